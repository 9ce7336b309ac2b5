use tenancy_controller_k8s_api::{Role, TenancyKind};

pub fn project_namespace(project: &str) -> String {
    format!("project-{project}")
}

/// Workspace namespaces nest under the parent project's namespace name.
pub fn workspace_namespace(parent_namespace: &str, workspace: &str) -> String {
    format!("{parent_namespace}--ws-{workspace}")
}

/// Name of the shared, role-only cluster role and of the namespaced role
/// binding referencing an entity-scoped cluster role.
pub fn role_name(kind: TenancyKind, role: Role) -> String {
    format!("{kind}-{role}")
}

/// Name of the cluster role and binding scoping a role to one project.
pub fn project_role_name(project: &str, role: Role) -> String {
    format!("project:{project}:{role}")
}

/// Name of the cluster role and binding scoping a role to one workspace,
/// qualified by the parent project.
pub fn workspace_role_name(project: &str, workspace: &str, role: Role) -> String {
    format!("project:{project}:workspace:{workspace}:{role}")
}
