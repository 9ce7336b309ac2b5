use crate::subject::{Role, Subject, TenancyKind};
use k8s_openapi::api::authentication::v1::UserInfo;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide admin escape hatch. A singleton looked up by the name the
/// operator was started with.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.tenancy.dev",
    version = "v1alpha1",
    kind = "MemberOverrides",
    plural = "memberoverrides"
)]
#[serde(rename_all = "camelCase")]
pub struct MemberOverridesSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_overrides: Vec<MemberOverride>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct MemberOverride {
    #[serde(flatten)]
    pub subject: Subject,

    /// Roles granted by this override.
    pub roles: Vec<Role>,

    /// Narrows the override to specific tenancy objects. An empty list makes
    /// the override global.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<OverrideResource>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct OverrideResource {
    pub kind: TenancyKind,
    pub name: String,
}

impl MemberOverride {
    fn covers(&self, name: &str, kind: TenancyKind) -> bool {
        self.resources
            .iter()
            .any(|r| r.kind == kind && r.name.eq_ignore_ascii_case(name))
    }
}

impl MemberOverrides {
    /// Whether some override entry grants `admin` to the requester for the
    /// named tenancy object, either globally or by a matching resource entry.
    pub fn has_admin_override(&self, user: &UserInfo, name: &str, kind: TenancyKind) -> bool {
        self.spec.member_overrides.iter().any(|entry| {
            entry.roles.contains(&Role::Admin)
                && entry.subject.matches_user(user)
                && (entry.resources.is_empty() || entry.covers(name, kind))
        })
    }
}
