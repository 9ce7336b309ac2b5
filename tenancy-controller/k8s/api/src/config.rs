use crate::subject::Role;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A group/version/kind triple as it appears in configuration and provider
/// registrations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Per-provider configuration singleton. Exactly one instance, named after
/// the provider, is honored by the config reconciler.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.tenancy.dev",
    version = "v1alpha1",
    kind = "ProjectWorkspaceConfig",
    shortname = "pwcfg"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWorkspaceConfigSpec {
    #[serde(default)]
    pub project: TenantConfig,

    #[serde(default)]
    pub workspace: TenantConfig,

    /// Name of the MemberOverrides singleton. Empty disables overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_overrides_name: Option<String>,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Configuration shared by both tenancy kinds.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    /// Kinds whose living instances prevent tenant deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_blocking_deletion: Vec<GroupVersionKind>,

    /// Extra rules granted per role. Verbs are passed through as configured.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_permissions: BTreeMap<Role, Vec<PolicyRule>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct WebhookConfig {
    #[serde(default)]
    pub disabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_omits_empty_group() {
        assert_eq!(GroupVersionKind::new("", "v1", "Secret").api_version(), "v1");
        assert_eq!(
            GroupVersionKind::new("mcp.tenancy.dev", "v2alpha1", "ManagedControlPlaneV2")
                .api_version(),
            "mcp.tenancy.dev/v2alpha1"
        );
    }

    #[test]
    fn spec_deserializes_role_keyed_permissions() {
        let spec: ProjectWorkspaceConfigSpec = serde_json::from_value(serde_json::json!({
            "project": {
                "resourcesBlockingDeletion": [
                    {"group": "mygroup.project", "version": "v1", "kind": "MyProjectBlockingResource"}
                ],
                "additionalPermissions": {
                    "view": [
                        {"apiGroups": ["mygroup.project"], "resources": ["myprojectadditionalresources1"], "verbs": ["get", "update"]}
                    ]
                }
            },
            "webhook": {"disabled": true}
        }))
        .unwrap();

        assert_eq!(spec.project.resources_blocking_deletion.len(), 1);
        let rules = spec.project.additional_permissions.get(&Role::View).unwrap();
        assert_eq!(
            rules[0].verbs,
            vec!["get".to_string(), "update".to_string()]
        );
        assert!(spec.webhook.disabled);
        assert!(spec.workspace.resources_blocking_deletion.is_empty());
    }
}
