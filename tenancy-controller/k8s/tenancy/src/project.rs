use crate::{
    common::{
        apply, ensure_finalizer, handle_delete, handle_remaining_content, CleanupError,
        Context, DeleteFlow, Error, TenancyMut, BLOCKED_REQUEUE, CONTROLLER_NAME, ERROR_REQUEUE,
    },
    names,
};
use futures::StreamExt;
use k8s_openapi::{
    api::{
        core::v1::Namespace,
        rbac::v1::{self as rbacv1, ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
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
use tenancy_controller_k8s_api::{
    labels, Member, Project, Role, TenancyKind, ALL_ROLES,
};
use tracing::{debug, warn};

/// Reconciles projects into a namespace plus the RBAC objects granting
/// member access, and drains them through the deletion state machine.
pub struct ProjectController;

impl ProjectController {
    pub async fn run(ctx: Arc<Context>) {
        let projects: Api<Project> = Api::all(ctx.store.static_onboarding().client());
        Controller::new(projects, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!(name = %obj.name, "Reconciled project"),
                    Err(error) => warn!(%error, "Project reconcile failed"),
                }
            })
            .await;
    }
}

async fn reconcile(project: Arc<Project>, ctx: Arc<Context>) -> Result<Action, Error> {
    let api: Api<Project> = Api::all(ctx.store.static_onboarding().client());
    let Some(project) = api.get_opt(&project.name_any()).await? else {
        debug!("Project not found");
        return Ok(Action::await_change());
    };

    let result = reconcile_inner(project.clone(), &api, &ctx).await;
    ctx.emit(&project, &result).await;
    result
}

async fn reconcile_inner(
    mut project: Project,
    api: &Api<Project>,
    ctx: &Context,
) -> Result<Action, Error> {
    let cluster = ctx.store.static_onboarding();
    let namespace_name = names::project_namespace(&project.name_any());
    let namespaces: Api<Namespace> = Api::all(cluster.client());

    if project.meta().deletion_timestamp.is_some() {
        let blocking = ctx.store.blocking_resources_for_project()?;
        let dynamic = ctx.store.dynamic_onboarding()?;
        let mut tenancy = TenancyMut::Project(&mut project);
        let blocked = handle_remaining_content(&dynamic, &mut tenancy, &blocking).await?;
        update_status(api, &project).await;
        if blocked {
            return Ok(Action::requeue(BLOCKED_REQUEUE));
        }

        // The namespace drains asynchronously; the per-project cluster
        // roles and bindings are garbage-collected via owner references.
        let flow = handle_delete(api, &project, || async {
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

    ensure_finalizer(api, &project).await?;

    apply(&namespaces, &desired_namespace(&project)).await?;
    project
        .status
        .get_or_insert_with(Default::default)
        .namespace = namespace_name.clone();

    let cluster_roles: Api<ClusterRole> = Api::all(cluster.client());
    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(cluster.client());
    let role_bindings: Api<RoleBinding> = Api::namespaced(cluster.client(), &namespace_name);
    for role in ALL_ROLES {
        let permissions = ctx.store.project_permissions(role)?;
        apply(&cluster_roles, &desired_cluster_role(&project, role, permissions)).await?;
        apply(
            &cluster_role_bindings,
            &desired_cluster_role_binding(&project, role),
        )
        .await?;
        apply(&role_bindings, &desired_role_binding(&project, role)).await?;
    }

    update_status(api, &project).await;
    Ok(Action::await_change())
}

fn error_policy(_project: Arc<Project>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(%error, "Project reconcile failed, requeueing");
    Action::requeue(ERROR_REQUEUE)
}

async fn update_status(api: &Api<Project>, project: &Project) {
    let patch = serde_json::json!({"status": project.status});
    if let Err(error) = api
        .patch_status(
            &project.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
    {
        warn!(%error, name = %project.name_any(), "Failed to update project status");
    }
}

fn owner_reference(project: &Project) -> OwnerReference {
    OwnerReference {
        api_version: Project::api_version(&()).into_owned(),
        kind: Project::kind(&()).into_owned(),
        name: project.name_any(),
        uid: project.uid().unwrap_or_default(),
        ..Default::default()
    }
}

pub(crate) fn subjects_for_role(members: &[Member], role: Role) -> Vec<rbacv1::Subject> {
    members
        .iter()
        .filter(|member| member.has_role(role))
        .map(|member| member.subject.to_rbac())
        .collect()
}

pub(crate) fn cluster_role_ref(name: &str) -> rbacv1::RoleRef {
    rbacv1::RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "ClusterRole".to_string(),
        name: name.to_string(),
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

fn desired_namespace(project: &Project) -> Namespace {
    let mut namespace = Namespace {
        metadata: managed_meta(&names::project_namespace(&project.name_any())),
        ..Default::default()
    };
    labels::set_label(
        &mut namespace.metadata,
        labels::PROJECT_LABEL,
        &project.name_any(),
    );
    namespace
}

/// The cluster role scoping `role` to one project: the role's permissions
/// inside the project namespace, visibility of the project object itself,
/// and a `get` on the namespace.
fn desired_cluster_role(project: &Project, role: Role, permissions: Vec<PolicyRule>) -> ClusterRole {
    let name = project.name_any();
    let namespace = names::project_namespace(&name);
    let mut rules = permissions;
    rules.push(PolicyRule {
        api_groups: Some(vec![labels::GROUP.to_string()]),
        resources: Some(vec!["projects".to_string()]),
        resource_names: Some(vec![name.clone()]),
        verbs: role.verbs(),
        ..Default::default()
    });
    rules.push(PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec!["namespaces".to_string()]),
        resource_names: Some(vec![namespace]),
        verbs: vec!["get".to_string()],
        ..Default::default()
    });

    let mut meta = managed_meta(&names::project_role_name(&name, role));
    meta.owner_references = Some(vec![owner_reference(project)]);
    ClusterRole {
        metadata: meta,
        rules: Some(rules),
        ..Default::default()
    }
}

fn desired_cluster_role_binding(project: &Project, role: Role) -> ClusterRoleBinding {
    let name = names::project_role_name(&project.name_any(), role);
    let mut meta = managed_meta(&name);
    meta.owner_references = Some(vec![owner_reference(project)]);
    ClusterRoleBinding {
        metadata: meta,
        subjects: Some(subjects_for_role(&project.spec.members, role)),
        role_ref: cluster_role_ref(&name),
    }
}

/// The namespaced binding granting members their permissions inside the
/// project namespace, referencing the project-scoped cluster role.
fn desired_role_binding(project: &Project, role: Role) -> RoleBinding {
    let mut meta = managed_meta(&names::role_name(TenancyKind::Project, role));
    meta.namespace = Some(names::project_namespace(&project.name_any()));
    meta.owner_references = Some(vec![owner_reference(project)]);
    RoleBinding {
        metadata: meta,
        subjects: Some(subjects_for_role(&project.spec.members, role)),
        role_ref: cluster_role_ref(&names::project_role_name(&project.name_any(), role)),
    }
}
