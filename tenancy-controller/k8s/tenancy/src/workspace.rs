use crate::{
    common::{
        apply, delete_ignoring_missing, ensure_finalizer, handle_delete,
        handle_remaining_content, CleanupError, Context, DeleteFlow, Error, TenancyMut,
        BLOCKED_REQUEUE, CONTROLLER_NAME, ERROR_REQUEUE,
    },
    names,
    project::{cluster_role_ref, subjects_for_role},
};
use futures::StreamExt;
use k8s_openapi::api::{
    core::v1::Namespace,
    rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding},
};
use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Resource, ResourceExt,
};
use std::sync::Arc;
use tenancy_controller_k8s_api::{labels, Project, Role, TenancyKind, Workspace, ALL_ROLES};
use tracing::{debug, warn};

/// Reconciles workspaces below their parent project: a nested namespace,
/// per-workspace cluster roles and bindings, and the deletion state machine
/// with explicit cross-namespace cleanup.
pub struct WorkspaceController;

impl WorkspaceController {
    pub async fn run(ctx: Arc<Context>) {
        let workspaces: Api<Workspace> = Api::all(ctx.store.static_onboarding().client());
        Controller::new(workspaces, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!(name = %obj.name, "Reconciled workspace"),
                    Err(error) => warn!(%error, "Workspace reconcile failed"),
                }
            })
            .await;
    }
}

async fn reconcile(workspace: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action, Error> {
    let cluster = ctx.store.static_onboarding();
    let parent_namespace = workspace.namespace().unwrap_or_default();
    let api: Api<Workspace> = Api::namespaced(cluster.client(), &parent_namespace);
    let Some(workspace) = api.get_opt(&workspace.name_any()).await? else {
        debug!("Workspace not found");
        return Ok(Action::await_change());
    };

    let result = reconcile_inner(workspace.clone(), &api, &ctx).await;
    ctx.emit(&workspace, &result).await;
    result
}

async fn reconcile_inner(
    mut workspace: Workspace,
    api: &Api<Workspace>,
    ctx: &Context,
) -> Result<Action, Error> {
    let cluster = ctx.store.static_onboarding();

    // The parent is resolved through the project label on the namespace the
    // workspace lives in, not through an explicit reference.
    let parent = project_for_namespace(&cluster.client(), &workspace.namespace().unwrap_or_default())
        .await?;
    let namespace_name = names::workspace_namespace(
        &workspace.namespace().unwrap_or_default(),
        &workspace.name_any(),
    );
    let namespaces: Api<Namespace> = Api::all(cluster.client());

    if workspace.meta().deletion_timestamp.is_some() {
        let blocking = ctx.store.blocking_resources_for_workspace()?;
        let dynamic = ctx.store.dynamic_onboarding()?;
        let mut tenancy = TenancyMut::Workspace(&mut workspace);
        let blocked = handle_remaining_content(&dynamic, &mut tenancy, &blocking).await?;
        update_status(api, &workspace).await;
        if blocked {
            return Ok(Action::requeue(BLOCKED_REQUEUE));
        }

        let parent_name = parent.name_any();
        let workspace_name = workspace.name_any();
        let client = cluster.client();
        let flow = handle_delete(api, &workspace, || async move {
            // Cross-namespace owner references are not allowed, so the
            // cluster roles and bindings are deleted explicitly.
            let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
            let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
            for role in ALL_ROLES {
                let name = names::workspace_role_name(&parent_name, &workspace_name, role);
                delete_ignoring_missing(&cluster_roles, &name).await?;
                delete_ignoring_missing(&cluster_role_bindings, &name).await?;
            }

            let namespaces: Api<Namespace> = Api::all(client);
            match namespaces.delete(&namespace_name, &Default::default()).await {
                Ok(_) => Err(CleanupError::ResourcesRemaining {
                    requeue_after: BLOCKED_REQUEUE,
                }),
                Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
                Err(error) => Err(error.into()),
            }
        })
        .await?;
        return Ok(match flow {
            DeleteFlow::Requeue(after) => Action::requeue(after),
            DeleteFlow::Finished | DeleteFlow::NotDeleting => Action::await_change(),
        });
    }

    ensure_finalizer(api, &workspace).await?;

    apply(&namespaces, &desired_namespace(&parent, &workspace)).await?;
    workspace
        .status
        .get_or_insert_with(Default::default)
        .namespace = namespace_name.clone();

    let cluster_roles: Api<ClusterRole> = Api::all(cluster.client());
    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(cluster.client());
    let role_bindings: Api<RoleBinding> = Api::namespaced(cluster.client(), &namespace_name);
    for role in ALL_ROLES {
        let permissions = ctx.store.workspace_permissions(role)?;
        apply(
            &cluster_roles,
            &desired_cluster_role(&parent, &workspace, role, permissions),
        )
        .await?;
        apply(
            &cluster_role_bindings,
            &desired_cluster_role_binding(&parent, &workspace, role),
        )
        .await?;
        apply(&role_bindings, &desired_role_binding(&parent, &workspace, role)).await?;
    }

    update_status(api, &workspace).await;
    Ok(Action::await_change())
}

fn error_policy(_workspace: Arc<Workspace>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(%error, "Workspace reconcile failed, requeueing");
    Action::requeue(ERROR_REQUEUE)
}

async fn project_for_namespace(client: &kube::Client, namespace: &str) -> Result<Project, Error> {
    let ns = Api::<Namespace>::all(client.clone()).get(namespace).await?;
    let project_name = ns
        .labels()
        .get(labels::PROJECT_LABEL)
        .filter(|name| !name.is_empty())
        .cloned()
        .ok_or_else(|| Error::ParentMissing(namespace.to_string()))?;
    Ok(Api::<Project>::all(client.clone()).get(&project_name).await?)
}

async fn update_status(api: &Api<Workspace>, workspace: &Workspace) {
    let patch = serde_json::json!({"status": workspace.status});
    if let Err(error) = api
        .patch_status(
            &workspace.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
    {
        warn!(%error, name = %workspace.name_any(), "Failed to update workspace status");
    }
}

fn managed_meta(name: &str) -> ObjectMeta {
    let mut meta = ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    };
    labels::set_label(&mut meta, labels::MANAGED_BY_LABEL, CONTROLLER_NAME);
    meta
}

fn desired_namespace(parent: &Project, workspace: &Workspace) -> Namespace {
    let name = names::workspace_namespace(
        &workspace.namespace().unwrap_or_default(),
        &workspace.name_any(),
    );
    let mut namespace = Namespace {
        metadata: managed_meta(&name),
        ..Default::default()
    };
    labels::set_label(
        &mut namespace.metadata,
        labels::PROJECT_LABEL,
        &parent.name_any(),
    );
    labels::set_label(
        &mut namespace.metadata,
        labels::WORKSPACE_LABEL,
        &workspace.name_any(),
    );
    namespace
}

/// The cluster role scoping `role` to one workspace: the role's permissions
/// inside the workspace namespace plus a `get` on that namespace.
fn desired_cluster_role(
    parent: &Project,
    workspace: &Workspace,
    role: Role,
    permissions: Vec<PolicyRule>,
) -> ClusterRole {
    let namespace = names::workspace_namespace(
        &workspace.namespace().unwrap_or_default(),
        &workspace.name_any(),
    );
    let mut rules = permissions;
    rules.push(PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec!["namespaces".to_string()]),
        resource_names: Some(vec![namespace]),
        verbs: vec!["get".to_string()],
        ..Default::default()
    });

    ClusterRole {
        metadata: managed_meta(&names::workspace_role_name(
            &parent.name_any(),
            &workspace.name_any(),
            role,
        )),
        rules: Some(rules),
        ..Default::default()
    }
}

fn desired_cluster_role_binding(
    parent: &Project,
    workspace: &Workspace,
    role: Role,
) -> ClusterRoleBinding {
    let name = names::workspace_role_name(&parent.name_any(), &workspace.name_any(), role);
    ClusterRoleBinding {
        metadata: managed_meta(&name),
        subjects: Some(subjects_for_role(&workspace.spec.members, role)),
        role_ref: cluster_role_ref(&name),
    }
}

fn desired_role_binding(parent: &Project, workspace: &Workspace, role: Role) -> RoleBinding {
    let mut meta = managed_meta(&names::role_name(TenancyKind::Workspace, role));
    meta.namespace = Some(names::workspace_namespace(
        &workspace.namespace().unwrap_or_default(),
        &workspace.name_any(),
    ));
    RoleBinding {
        metadata: meta,
        subjects: Some(subjects_for_role(&workspace.spec.members, role)),
        role_ref: cluster_role_ref(&names::workspace_role_name(
            &parent.name_any(),
            &workspace.name_any(),
            role,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenancy_controller_k8s_api::{
        Member, ProjectSpec, Subject, WorkspaceSpec,
    };

    fn fixtures() -> (Project, Workspace) {
        let project = Project::new("demo", ProjectSpec { members: vec![] });
        let mut workspace = Workspace::new(
            "dev",
            WorkspaceSpec {
                members: vec![Member {
                    subject: Subject::ServiceAccount {
                        namespace: "ci".into(),
                        name: "deployer".into(),
                    },
                    roles: vec![Role::Admin],
                }],
            },
        );
        workspace.metadata.namespace = Some("project-demo".into());
        (project, workspace)
    }

    #[test]
    fn namespace_carries_both_tenancy_labels() {
        let (project, workspace) = fixtures();
        let namespace = desired_namespace(&project, &workspace);
        assert_eq!(
            namespace.metadata.name.as_deref(),
            Some("project-demo--ws-dev")
        );
        let meta_labels = namespace.metadata.labels.unwrap();
        assert_eq!(
            meta_labels.get(labels::PROJECT_LABEL).map(String::as_str),
            Some("demo")
        );
        assert_eq!(
            meta_labels.get(labels::WORKSPACE_LABEL).map(String::as_str),
            Some("dev")
        );
    }

    #[test]
    fn cluster_role_grants_namespace_get_only_beyond_permissions() {
        let (project, workspace) = fixtures();
        let permissions = vec![PolicyRule {
            api_groups: Some(vec!["mcp.tenancy.dev".to_string()]),
            resources: Some(vec!["managedcontrolplanev2s".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }];
        let cluster_role = desired_cluster_role(&project, &workspace, Role::View, permissions);

        assert_eq!(
            cluster_role.metadata.name.as_deref(),
            Some("project:demo:workspace:dev:view")
        );
        // Workspaces are not owned across namespaces; cleanup is explicit.
        assert!(cluster_role.metadata.owner_references.is_none());
        let rules = cluster_role.rules.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[1].resource_names,
            Some(vec!["project-demo--ws-dev".to_string()])
        );
    }

    #[test]
    fn role_binding_references_workspace_scoped_cluster_role() {
        let (project, workspace) = fixtures();
        let binding = desired_role_binding(&project, &workspace, Role::Admin);
        assert_eq!(binding.metadata.name.as_deref(), Some("workspace-admin"));
        assert_eq!(
            binding.metadata.namespace.as_deref(),
            Some("project-demo--ws-dev")
        );
        assert_eq!(binding.role_ref.name, "project:demo:workspace:dev:admin");
        let subjects = binding.subjects.unwrap();
        assert_eq!(subjects[0].kind, "ServiceAccount");
        assert_eq!(subjects[0].namespace.as_deref(), Some("ci"));
    }
}
