use crate::{
    common::{apply, Error, CONTROLLER_NAME},
    names,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use kube::api::{Api, ObjectMeta};
use tenancy_controller_k8s_api::{
    labels, ProjectWorkspaceConfigSpec, Role, TenancyKind,
};
use tracing::info;

fn all_verbs() -> Vec<String> {
    ["get", "list", "watch", "create", "update", "patch", "delete"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn read_only_verbs() -> Vec<String> {
    ["get", "list", "watch"].into_iter().map(String::from).collect()
}

/// Creates the four role-only cluster roles (`project-admin`,
/// `project-view`, `workspace-admin`, `workspace-view`) that identity
/// brokers bind members to from outside. Each aggregates the per-role
/// `additionalPermissions` from the configuration.
pub struct RbacSetup {
    client: kube::Client,
    config: ProjectWorkspaceConfigSpec,
}

impl RbacSetup {
    pub fn new(client: kube::Client, config: ProjectWorkspaceConfigSpec) -> Self {
        Self { client, config }
    }

    pub async fn ensure_resources(&self) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        for role in [Role::Admin, Role::View] {
            apply(&api, &self.project_cluster_role(role)).await?;
            apply(&api, &self.workspace_cluster_role(role)).await?;
            info!(role = %role, "Ensured static cluster roles");
        }
        Ok(())
    }

    fn project_cluster_role(&self, role: Role) -> ClusterRole {
        let verbs = match role {
            Role::Admin => all_verbs(),
            Role::View => read_only_verbs(),
        };
        let mut rules = vec![
            PolicyRule {
                api_groups: Some(vec![labels::GROUP.to_string()]),
                resources: Some(vec!["workspaces".to_string()]),
                verbs: verbs.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["serviceaccounts".to_string()]),
                verbs: verbs.clone(),
                ..Default::default()
            },
            // Listing pods keeps interactive cluster tooling working in
            // otherwise workload-free tenant namespaces.
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["list".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["resourcequotas".to_string()]),
                verbs: read_only_verbs(),
                ..Default::default()
            },
        ];
        if role == Role::Admin {
            rules.push(token_rule());
        }
        rules.extend(self.extras(&self.config.project, role));
        named_cluster_role(&names::role_name(TenancyKind::Project, role), rules)
    }

    fn workspace_cluster_role(&self, role: Role) -> ClusterRole {
        let verbs = match role {
            Role::Admin => all_verbs(),
            Role::View => read_only_verbs(),
        };
        let mut rules = vec![
            PolicyRule {
                api_groups: Some(vec!["mcp.tenancy.dev".to_string()]),
                resources: Some(vec!["managedcontrolplanev2s".to_string()]),
                verbs: verbs.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec![
                    "secrets".to_string(),
                    "configmaps".to_string(),
                    "serviceaccounts".to_string(),
                ]),
                verbs: verbs.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["list".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["resourcequotas".to_string()]),
                verbs: read_only_verbs(),
                ..Default::default()
            },
        ];
        if role == Role::Admin {
            rules.push(token_rule());
        }
        rules.extend(self.extras(&self.config.workspace, role));
        named_cluster_role(&names::role_name(TenancyKind::Workspace, role), rules)
    }

    fn extras(
        &self,
        config: &tenancy_controller_k8s_api::TenantConfig,
        role: Role,
    ) -> Vec<PolicyRule> {
        config
            .additional_permissions
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }
}

fn token_rule() -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec!["serviceaccounts/token".to_string()]),
        verbs: vec!["create".to_string()],
        ..Default::default()
    }
}

fn named_cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    let mut meta = ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    };
    labels::set_label(&mut meta, labels::MANAGED_BY_LABEL, CONTROLLER_NAME);
    ClusterRole {
        metadata: meta,
        rules: Some(rules),
        ..Default::default()
    }
}
