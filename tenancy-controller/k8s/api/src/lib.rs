#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access_request;
pub mod condition;
pub mod config;
pub mod labels;
pub mod overrides;
pub mod project;
pub mod provider;
pub mod subject;
pub mod workspace;

pub use self::{
    access_request::{AccessRequest, AccessRequestPhase, AccessRequestSpec, AccessRequestStatus},
    condition::{
        Condition, ConditionStatus, RemainingContent, CONDITION_CONTENT_REMAINING,
        REASON_RESOURCES_REMAINING,
    },
    config::{GroupVersionKind, ProjectWorkspaceConfig, ProjectWorkspaceConfigSpec, TenantConfig},
    labels::{
        CREATED_BY_ANNOTATION, DELETE_FINALIZER, DISPLAY_NAME_ANNOTATION, GROUP,
        MANAGED_BY_LABEL, PROJECT_LABEL, WORKSPACE_LABEL,
    },
    overrides::{MemberOverride, MemberOverrides, MemberOverridesSpec, OverrideResource},
    project::{Project, ProjectSpec, ProjectStatus},
    provider::{ServiceProvider, ServiceProviderSpec, ServiceProviderStatus},
    subject::{roles_for_user, Member, Role, RoleParseError, Subject, TenancyKind, ALL_ROLES},
    workspace::{Workspace, WorkspaceSpec, WorkspaceStatus},
};

pub use k8s_openapi::api::{
    authentication::v1::UserInfo,
    core::v1::Namespace,
    rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef},
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};

/// Event reasons emitted by every reconciler.
pub const EVENT_REASON_RECONCILE_FAILED: &str = "ReconcileFailed";
pub const EVENT_REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
