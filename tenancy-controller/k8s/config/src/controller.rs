use crate::{
    access::{AccessBroker, AccessError, AccessStatus},
    cluster::Cluster,
    discovery::{DiscoverResourceName, DiscoveryError},
    resources::{DeletionBlockingResource, GroupedResources, ResourceGrouping, Source},
    store::{SharedStore, Snapshot},
};
use futures::StreamExt;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
    Resource, ResourceExt,
};
use std::{sync::Arc, time::Duration};
use tenancy_controller_k8s_api::{
    ProjectWorkspaceConfig, ProjectWorkspaceConfigSpec, ServiceProvider,
    EVENT_REASON_RECONCILE_FAILED, EVENT_REASON_RECONCILE_SUCCEEDED,
};
use tracing::{debug, info, warn};

const CONTROLLER_NAME: &str = "tenancy-config";
const ERROR_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to fetch ProjectWorkspaceConfig: {0}")]
    Fetch(#[source] kube::Error),

    #[error("failed to list ServiceProviders: {0}")]
    ListProviders(#[source] kube::Error),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to update access grant for the onboarding cluster: {0}")]
    Access(#[from] AccessError),
}

/// Watches the configuration singleton and the provider registry, rebuilds
/// the shared snapshot, and keeps the dynamic access grant wide enough to
/// observe every deletion-blocking kind.
pub struct ConfigController {
    provider_name: String,
    platform: Cluster,
    store: SharedStore,
    discovery: Arc<dyn DiscoverResourceName>,
    broker: Arc<dyn AccessBroker>,
    recorder: Recorder,
}

impl ConfigController {
    pub fn new(
        provider_name: impl Into<String>,
        platform: Cluster,
        store: SharedStore,
        discovery: Arc<dyn DiscoverResourceName>,
        broker: Arc<dyn AccessBroker>,
    ) -> Arc<Self> {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: None,
        };
        let recorder = Recorder::new(platform.client(), reporter);
        Arc::new(Self {
            provider_name: provider_name.into(),
            platform,
            store,
            discovery,
            broker,
            recorder,
        })
    }

    pub async fn run(self: Arc<Self>) {
        let configs: Api<ProjectWorkspaceConfig> = Api::all(self.platform.client());
        let providers: Api<ServiceProvider> = Api::all(self.platform.client());
        let provider_name = self.provider_name.clone();

        Controller::new(configs, watcher::Config::default())
            .watches(providers, watcher::Config::default(), move |_provider| {
                // Any provider status change can alter the aggregated sets;
                // funnel every event to the provider-named config.
                Some(ObjectRef::<ProjectWorkspaceConfig>::new(&provider_name))
            })
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, self)
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!(name = %obj.name, "Reconciled configuration"),
                    Err(error) => warn!(%error, "Configuration reconcile failed"),
                }
            })
            .await;
    }

    async fn reconcile(
        cfg: Arc<ProjectWorkspaceConfig>,
        ctx: Arc<Self>,
    ) -> Result<Action, ReconcileError> {
        let name = cfg.name_any();
        if name != ctx.provider_name {
            debug!(expected = %ctx.provider_name, actual = %name, "Ignoring ProjectWorkspaceConfig with unexpected name");
            return Ok(Action::await_change());
        }

        let result = ctx.reconcile_inner(&name).await;
        match &result {
            Ok(_) => ctx.emit(&cfg, EventType::Normal, "Reconciliation successful").await,
            Err(error) => {
                ctx.emit(&cfg, EventType::Warning, &error.to_string()).await
            }
        }
        result
    }

    async fn reconcile_inner(&self, name: &str) -> Result<Action, ReconcileError> {
        let api: Api<ProjectWorkspaceConfig> = Api::all(self.platform.client());
        let cfg = match api.get_opt(name).await.map_err(ReconcileError::Fetch)? {
            Some(cfg) if cfg.meta().deletion_timestamp.is_none() => cfg,
            Some(_) => {
                info!("ProjectWorkspaceConfig is in deletion, resetting state");
                return self.reset().await;
            }
            None => {
                info!("ProjectWorkspaceConfig is missing, resetting state");
                return self.reset().await;
            }
        };

        let providers: Api<ServiceProvider> = Api::all(self.platform.client());
        let providers = providers
            .list(&ListParams::default())
            .await
            .map_err(ReconcileError::ListProviders)?
            .items;
        debug!(count = providers.len(), "Fetched ServiceProviders");

        let snapshot = build_snapshot(&cfg.spec, &providers, self.discovery.as_ref()).await?;
        let rules = dynamic_grant_rules(&snapshot);

        match self.broker.ensure(&rules).await? {
            AccessStatus::Pending { retry_after } => {
                // Nothing is published until the grant converges; readers
                // keep the previous snapshot.
                info!(?retry_after, "Waiting for dynamic onboarding cluster access");
                Ok(Action::requeue(retry_after))
            }
            AccessStatus::Granted(cluster) => {
                self.store.publish(snapshot, cluster);
                info!("Successfully reloaded configuration");
                Ok(Action::await_change())
            }
        }
    }

    async fn reset(&self) -> Result<Action, ReconcileError> {
        self.store.clear();
        self.broker.revoke().await?;
        Ok(Action::await_change())
    }

    async fn emit(&self, cfg: &ProjectWorkspaceConfig, type_: EventType, note: &str) {
        let reason = match type_ {
            EventType::Normal => EVENT_REASON_RECONCILE_SUCCEEDED,
            EventType::Warning => EVENT_REASON_RECONCILE_FAILED,
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, &cfg.object_ref(&())).await {
            warn!(%error, "Failed to publish event");
        }
    }

    fn error_policy(
        _cfg: Arc<ProjectWorkspaceConfig>,
        error: &ReconcileError,
        _ctx: Arc<Self>,
    ) -> Action {
        warn!(%error, "Configuration reconcile failed, requeueing");
        Action::requeue(ERROR_REQUEUE)
    }
}

/// Assembles a snapshot from the configuration spec and the provider
/// registry. Fails without side effects when discovery cannot resolve a
/// kind, so the previous snapshot stays in place.
pub async fn build_snapshot(
    spec: &ProjectWorkspaceConfigSpec,
    providers: &[ServiceProvider],
    discovery: &dyn DiscoverResourceName,
) -> Result<Snapshot, DiscoveryError> {
    let mut blocking_project = Vec::new();
    for gvk in &spec.project.resources_blocking_deletion {
        blocking_project.push(DeletionBlockingResource {
            resource: discovery.resource_name_for(gvk).await?,
            gvk: gvk.clone(),
            source: Source::Config,
        });
    }

    let mut blocking_workspace = Vec::new();
    for gvk in &spec.workspace.resources_blocking_deletion {
        blocking_workspace.push(DeletionBlockingResource {
            resource: discovery.resource_name_for(gvk).await?,
            gvk: gvk.clone(),
            source: Source::Config,
        });
    }

    // Providers currently only extend the workspace-side sets. Extending the
    // project side as well is an open extension point that becomes relevant
    // once control planes may live at project level.
    let permissible_project = GroupedResources::default();
    let mut permissible_workspace = GroupedResources::default();
    for provider in providers {
        let advertised = provider
            .status
            .as_ref()
            .map(|status| status.resources.as_slice())
            .unwrap_or_default();
        for gvk in advertised {
            let resource = discovery.resource_name_for(gvk).await?;
            blocking_workspace.push(DeletionBlockingResource {
                gvk: gvk.clone(),
                resource: resource.clone(),
                source: Source::ServiceProvider(provider.name_any()),
            });
            permissible_workspace.append(ResourceGrouping {
                api_groups: vec![gvk.group.clone()],
                resources: vec![resource],
            });
        }
    }

    Ok(Snapshot {
        blocking_project,
        blocking_workspace,
        permissible_project,
        permissible_workspace,
        project_extra_rules: spec.project.additional_permissions.clone(),
        workspace_extra_rules: spec.workspace.additional_permissions.clone(),
    })
}

/// The permission grant backing the dynamic onboarding handle: read access
/// to every blocking kind and its status subresource, coalesced by apiGroup.
/// Builtin kinds are covered by the static handle and excluded here.
pub fn dynamic_grant_rules(snapshot: &Snapshot) -> Vec<PolicyRule> {
    let mut grouped = GroupedResources::default();
    for res in snapshot
        .blocking_project
        .iter()
        .chain(snapshot.blocking_workspace.iter())
    {
        grouped.append(ResourceGrouping {
            api_groups: vec![res.gvk.group.clone()],
            resources: vec![res.resource.clone(), format!("{}/status", res.resource)],
        });
    }
    grouped.to_rules(&[
        "get".to_string(),
        "list".to_string(),
        "watch".to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use tenancy_controller_k8s_api::{
        GroupVersionKind, Role, ServiceProviderSpec, ServiceProviderStatus, TenantConfig,
    };

    fn provider(name: &str, resources: Vec<GroupVersionKind>) -> ServiceProvider {
        let mut sp = ServiceProvider::new(name, ServiceProviderSpec::default());
        sp.status = Some(ServiceProviderStatus { resources });
        sp
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
    async fn empty_config_and_no_providers_yields_empty_snapshot() {
        let spec = ProjectWorkspaceConfigSpec::default();
        let snapshot = build_snapshot(&spec, &[], &StaticDiscovery::default())
            .await
            .unwrap();

        assert!(snapshot.blocking_project.is_empty());
        assert!(snapshot.blocking_workspace.is_empty());
        assert!(snapshot.permissible_project.is_empty());
        assert!(snapshot.permissible_workspace.is_empty());
        assert!(dynamic_grant_rules(&snapshot).is_empty());
    }

    #[tokio::test]
    async fn providers_extend_workspace_side_only() {
        let discovery = StaticDiscovery::default()
            .with("v1", "ConfigMap", "configmaps")
            .with("v1", "Secret", "secrets");
        let providers = vec![
            provider("dummy-1", vec![GroupVersionKind::new("", "v1", "ConfigMap")]),
            provider("dummy-2", vec![GroupVersionKind::new("", "v1", "Secret")]),
        ];
        let spec = ProjectWorkspaceConfigSpec::default();
        let snapshot = build_snapshot(&spec, &providers, &discovery).await.unwrap();

        assert!(snapshot.blocking_project.is_empty());
        assert!(snapshot.permissible_project.is_empty());

        let sources: Vec<String> = snapshot
            .blocking_workspace
            .iter()
            .map(|r| r.source.to_string())
            .collect();
        assert_eq!(
            sources,
            vec!["serviceProvider[dummy-1]", "serviceProvider[dummy-2]"]
        );

        let groupings: Vec<_> = snapshot.permissible_workspace.iter().cloned().collect();
        assert_eq!(
            groupings,
            vec![ResourceGrouping {
                api_groups: vec!["".to_string()],
                resources: vec!["configmaps".to_string(), "secrets".to_string()],
            }]
        );

        assert_eq!(
            dynamic_grant_rules(&snapshot),
            vec![rule(
                &[""],
                &["configmaps", "configmaps/status", "secrets", "secrets/status"],
                &["get", "list", "watch"]
            )]
        );
    }

    #[tokio::test]
    async fn config_blocking_resources_feed_the_grant() {
        let discovery = StaticDiscovery::default()
            .with(
                "mygroup.project/v1",
                "MyProjectBlockingResource",
                "myprojectblockingresources",
            )
            .with(
                "mygroup.workspace/v1alpha1",
                "MyWorkspaceBlockingResource1",
                "myworkspaceblockingresources1",
            )
            .with(
                "mygroup.workspace/v1alpha1",
                "MyWorkspaceBlockingResource2",
                "myworkspaceblockingresources2",
            );
        let spec = ProjectWorkspaceConfigSpec {
            project: TenantConfig {
                resources_blocking_deletion: vec![GroupVersionKind::new(
                    "mygroup.project",
                    "v1",
                    "MyProjectBlockingResource",
                )],
                ..Default::default()
            },
            workspace: TenantConfig {
                resources_blocking_deletion: vec![
                    GroupVersionKind::new(
                        "mygroup.workspace",
                        "v1alpha1",
                        "MyWorkspaceBlockingResource1",
                    ),
                    GroupVersionKind::new(
                        "mygroup.workspace",
                        "v1alpha1",
                        "MyWorkspaceBlockingResource2",
                    ),
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        let snapshot = build_snapshot(&spec, &[], &discovery).await.unwrap();
        assert_eq!(snapshot.blocking_project.len(), 1);
        assert_eq!(snapshot.blocking_project[0].source, Source::Config);
        assert_eq!(snapshot.blocking_workspace.len(), 2);

        assert_eq!(
            dynamic_grant_rules(&snapshot),
            vec![
                rule(
                    &["mygroup.project"],
                    &[
                        "myprojectblockingresources",
                        "myprojectblockingresources/status"
                    ],
                    &["get", "list", "watch"]
                ),
                rule(
                    &["mygroup.workspace"],
                    &[
                        "myworkspaceblockingresources1",
                        "myworkspaceblockingresources1/status",
                        "myworkspaceblockingresources2",
                        "myworkspaceblockingresources2/status"
                    ],
                    &["get", "list", "watch"]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn extras_survive_snapshot_assembly_verbatim() {
        let mut spec = ProjectWorkspaceConfigSpec::default();
        spec.project.additional_permissions.insert(
            Role::View,
            vec![rule(
                &["mygroup.project"],
                &["myprojectadditionalresources1"],
                &["get", "update"],
            )],
        );

        let snapshot = build_snapshot(&spec, &[], &StaticDiscovery::default())
            .await
            .unwrap();
        assert_eq!(
            snapshot.project_extra_rules.get(&Role::View).unwrap()[0].verbs,
            vec!["get".to_string(), "update".to_string()]
        );
    }

    #[tokio::test]
    async fn removing_a_provider_restores_the_prior_snapshot() {
        let discovery = StaticDiscovery::default().with("v1", "Secret", "secrets");
        let spec = ProjectWorkspaceConfigSpec::default();

        let before = build_snapshot(&spec, &[], &discovery).await.unwrap();
        let with = build_snapshot(
            &spec,
            &[provider("dummy-1", vec![GroupVersionKind::new("", "v1", "Secret")])],
            &discovery,
        )
        .await
        .unwrap();
        let after = build_snapshot(&spec, &[], &discovery).await.unwrap();

        assert_ne!(with.blocking_workspace, before.blocking_workspace);
        assert_eq!(after.blocking_workspace, before.blocking_workspace);
        assert_eq!(after.permissible_workspace, before.permissible_workspace);
        assert_eq!(dynamic_grant_rules(&after), dynamic_grant_rules(&before));
    }

    #[tokio::test]
    async fn unknown_kind_fails_snapshot_assembly() {
        let spec = ProjectWorkspaceConfigSpec {
            workspace: TenantConfig {
                resources_blocking_deletion: vec![GroupVersionKind::new(
                    "unknown.example",
                    "v1",
                    "Mystery",
                )],
                ..Default::default()
            },
            ..Default::default()
        };
        let result = build_snapshot(&spec, &[], &StaticDiscovery::default()).await;
        assert!(result.is_err());
    }
}
