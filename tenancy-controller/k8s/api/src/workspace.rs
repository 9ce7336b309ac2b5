use crate::{
    condition::{self, Condition},
    subject::{self, Member, Role},
};
use k8s_openapi::api::authentication::v1::UserInfo;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A workspace inside a project. Lives in the parent project's namespace;
/// the parent is resolved through that namespace's project label rather than
/// an explicit reference.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.tenancy.dev",
    version = "v1alpha1",
    kind = "Workspace",
    status = "WorkspaceStatus",
    shortname = "ws",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Workspace members.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// The namespace created for this workspace. Set exactly once.
    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Workspace {
    pub fn roles_for_user(&self, user: &UserInfo) -> BTreeSet<Role> {
        subject::roles_for_user(&self.spec.members, user)
    }

    pub fn user_has_role(&self, user: &UserInfo, role: Role) -> bool {
        self.roles_for_user(user).contains(&role)
    }

    pub fn set_or_update_condition(&mut self, c: Condition) {
        let status = self.status.get_or_insert_with(Default::default);
        condition::set_or_update_condition(&mut status.conditions, c);
    }

    pub fn remove_condition(&mut self, type_: &str) {
        if let Some(status) = self.status.as_mut() {
            condition::remove_condition(&mut status.conditions, type_);
        }
    }
}
