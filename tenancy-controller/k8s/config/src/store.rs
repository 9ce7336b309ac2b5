use crate::{
    cluster::Cluster,
    resources::{self, DeletionBlockingResource, GroupedResources},
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tenancy_controller_k8s_api::Role;

pub type SharedStore = Arc<ConfigStore>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ProjectWorkspaceConfig is missing")]
    MissingConfig,

    #[error("dynamic onboarding cluster access is not initialized yet")]
    Uninitialized,
}

/// The assembled configuration state published by the config reconciler.
/// Contains only config- and provider-sourced entries; the builtin entries
/// are appended by the readers so they can never be replaced.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub blocking_project: Vec<DeletionBlockingResource>,
    pub blocking_workspace: Vec<DeletionBlockingResource>,
    pub permissible_project: GroupedResources,
    pub permissible_workspace: GroupedResources,
    pub project_extra_rules: BTreeMap<Role, Vec<PolicyRule>>,
    pub workspace_extra_rules: BTreeMap<Role, Vec<PolicyRule>>,
}

#[derive(Default)]
struct State {
    snapshot: Option<Snapshot>,
    dynamic: Option<Cluster>,
}

/// Process-wide configuration store. The config reconciler is the only
/// writer; reconcilers and webhooks read through the lock. Readers receive
/// owned copies and never observe a half-installed snapshot.
pub struct ConfigStore {
    static_onboarding: Cluster,
    state: RwLock<State>,
}

impl ConfigStore {
    pub fn shared(static_onboarding: Cluster) -> SharedStore {
        Arc::new(Self {
            static_onboarding,
            state: RwLock::new(State::default()),
        })
    }

    pub fn blocking_resources_for_project(
        &self,
    ) -> Result<Vec<DeletionBlockingResource>, Error> {
        let state = self.state.read();
        let snapshot = state.snapshot.as_ref().ok_or(Error::MissingConfig)?;
        let mut res = resources::builtin_blocking_project();
        res.extend(snapshot.blocking_project.iter().cloned());
        Ok(res)
    }

    pub fn blocking_resources_for_workspace(
        &self,
    ) -> Result<Vec<DeletionBlockingResource>, Error> {
        let state = self.state.read();
        let snapshot = state.snapshot.as_ref().ok_or(Error::MissingConfig)?;
        let mut res = resources::builtin_blocking_workspace();
        res.extend(snapshot.blocking_workspace.iter().cloned());
        Ok(res)
    }

    /// The rules members holding `role` receive in a project namespace.
    pub fn project_permissions(&self, role: Role) -> Result<Vec<PolicyRule>, Error> {
        let state = self.state.read();
        let snapshot = state.snapshot.as_ref().ok_or(Error::MissingConfig)?;
        let mut permissible = resources::builtin_permissible_project();
        permissible.extend_from(&snapshot.permissible_project);
        let mut rules = permissible.to_rules(&role.verbs());
        rules.extend(
            snapshot
                .project_extra_rules
                .get(&role)
                .into_iter()
                .flatten()
                .cloned(),
        );
        Ok(rules)
    }

    /// The rules members holding `role` receive in a workspace namespace.
    pub fn workspace_permissions(&self, role: Role) -> Result<Vec<PolicyRule>, Error> {
        let state = self.state.read();
        let snapshot = state.snapshot.as_ref().ok_or(Error::MissingConfig)?;
        let mut permissible = resources::builtin_permissible_workspace();
        permissible.extend_from(&snapshot.permissible_workspace);
        let mut rules = permissible.to_rules(&role.verbs());
        rules.extend(
            snapshot
                .workspace_extra_rules
                .get(&role)
                .into_iter()
                .flatten()
                .cloned(),
        );
        Ok(rules)
    }

    /// Long-lived handle with the fixed permission set (namespaces, secrets,
    /// RBAC, tenancy objects).
    pub fn static_onboarding(&self) -> Cluster {
        self.static_onboarding.clone()
    }

    /// Handle whose permissions track the blocking-resource sets. Available
    /// once the first grant has been materialized.
    pub fn dynamic_onboarding(&self) -> Result<Cluster, Error> {
        self.state
            .read()
            .dynamic
            .clone()
            .ok_or(Error::Uninitialized)
    }

    /// Installs a fully assembled snapshot and rebinds the dynamic handle in
    /// one critical section.
    pub fn publish(&self, snapshot: Snapshot, dynamic: Cluster) {
        let mut state = self.state.write();
        state.snapshot = Some(snapshot);
        state.dynamic = Some(dynamic);
    }

    /// Drops the snapshot and dynamic handle; readers report a missing
    /// config until the next publish.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.snapshot = None;
        state.dynamic = None;
    }

    pub fn has_snapshot(&self) -> bool {
        self.state.read().snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ResourceGrouping, Source};
    use tenancy_controller_k8s_api::GroupVersionKind;

    fn store_with(snapshot: Snapshot) -> SharedStore {
        let store = test_store();
        store.publish_snapshot_only(snapshot);
        store
    }

    fn test_store() -> SharedStore {
        ConfigStore::shared_for_tests()
    }

    impl ConfigStore {
        fn shared_for_tests() -> SharedStore {
            Arc::new(ConfigStore {
                static_onboarding: Cluster::new("onboarding", test_client()),
                state: RwLock::new(State::default()),
            })
        }

        fn publish_snapshot_only(&self, snapshot: Snapshot) {
            self.state.write().snapshot = Some(snapshot);
        }
    }

    fn test_client() -> kube::Client {
        // An inert client backed by an address nothing listens on; readers
        // under test never issue requests through it.
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        kube::Client::try_from(config).expect("config must produce a client")
    }

    fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn readers_fail_without_snapshot() {
        let store = test_store();
        assert!(matches!(
            store.blocking_resources_for_project(),
            Err(Error::MissingConfig)
        ));
        assert!(matches!(
            store.project_permissions(Role::Admin),
            Err(Error::MissingConfig)
        ));
        assert!(matches!(
            store.dynamic_onboarding(),
            Err(Error::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn empty_snapshot_serves_builtins() {
        let store = store_with(Snapshot::default());

        let blocking = store.blocking_resources_for_project().unwrap();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].gvk.kind, "Workspace");
        assert_eq!(blocking[0].source, Source::Builtin);

        let blocking = store.blocking_resources_for_workspace().unwrap();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].gvk.kind, "ManagedControlPlaneV2");

        let view = store.project_permissions(Role::View).unwrap();
        assert_eq!(
            view,
            vec![rule(
                &["core.tenancy.dev"],
                &["workspaces"],
                &["get", "list", "watch"]
            )]
        );
        let admin = store.project_permissions(Role::Admin).unwrap();
        assert_eq!(
            admin,
            vec![rule(&["core.tenancy.dev"], &["workspaces"], &["*"])]
        );

        let view = store.workspace_permissions(Role::View).unwrap();
        assert_eq!(
            view,
            vec![rule(
                &["mcp.tenancy.dev"],
                &["managedcontrolplanev2s"],
                &["get", "list", "watch"]
            )]
        );
    }

    #[tokio::test]
    async fn runtime_additions_append_after_builtins() {
        let snapshot = Snapshot {
            blocking_workspace: vec![DeletionBlockingResource {
                gvk: GroupVersionKind::new("", "v1", "Secret"),
                resource: "secrets".into(),
                source: Source::ServiceProvider("dummy-2".into()),
            }],
            permissible_workspace: GroupedResources::new(vec![ResourceGrouping {
                api_groups: vec!["".into()],
                resources: vec!["configmaps".into(), "secrets".into()],
            }]),
            ..Default::default()
        };
        let store = store_with(snapshot);

        let blocking = store.blocking_resources_for_workspace().unwrap();
        assert_eq!(blocking.len(), 2);
        assert_eq!(blocking[0].source, Source::Builtin);
        assert_eq!(
            blocking[1].source,
            Source::ServiceProvider("dummy-2".into())
        );

        let admin = store.workspace_permissions(Role::Admin).unwrap();
        assert_eq!(
            admin,
            vec![
                rule(&["mcp.tenancy.dev"], &["managedcontrolplanev2s"], &["*"]),
                rule(&[""], &["configmaps", "secrets"], &["*"]),
            ]
        );
    }

    #[tokio::test]
    async fn extras_keep_their_configured_verbs() {
        let mut project_extra_rules = BTreeMap::new();
        project_extra_rules.insert(
            Role::View,
            vec![rule(
                &["mygroup.project"],
                &["myprojectadditionalresources1"],
                &["get", "update"],
            )],
        );
        let store = store_with(Snapshot {
            project_extra_rules,
            ..Default::default()
        });

        let view = store.project_permissions(Role::View).unwrap();
        assert_eq!(
            view,
            vec![
                rule(
                    &["core.tenancy.dev"],
                    &["workspaces"],
                    &["get", "list", "watch"]
                ),
                rule(
                    &["mygroup.project"],
                    &["myprojectadditionalresources1"],
                    &["get", "update"]
                ),
            ]
        );

        // No extras were configured for admin.
        let admin = store.project_permissions(Role::Admin).unwrap();
        assert_eq!(
            admin,
            vec![rule(&["core.tenancy.dev"], &["workspaces"], &["*"])]
        );
    }

    #[tokio::test]
    async fn clear_returns_readers_to_missing_config() {
        let store = store_with(Snapshot::default());
        assert!(store.blocking_resources_for_project().is_ok());
        store.clear();
        assert!(matches!(
            store.blocking_resources_for_project(),
            Err(Error::MissingConfig)
        ));
    }
}
