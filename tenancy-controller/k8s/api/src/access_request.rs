use k8s_openapi::api::{core::v1::SecretReference, rbac::v1::PolicyRule};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Wire object of the platform's cluster-access broker: the operator writes
/// the permission grant it needs, the platform answers with a kubeconfig
/// secret once the grant is materialized.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "platform.tenancy.dev",
    version = "v1alpha1",
    kind = "AccessRequest",
    status = "AccessRequestStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestSpec {
    /// Logical target cluster, e.g. `onboarding`.
    pub cluster: String,

    /// Rules the issued credentials must cover.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<PolicyRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum AccessRequestPhase {
    #[default]
    Pending,
    Granted,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestStatus {
    #[serde(default)]
    pub phase: AccessRequestPhase,

    /// Secret holding the kubeconfig for the granted access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,

    /// How long to wait before polling again while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u32>,
}
