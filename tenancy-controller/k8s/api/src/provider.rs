use crate::config::GroupVersionKind;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Registration of a downstream service provider on the platform cluster.
/// Only the advertised resource kinds in the status are consumed here; the
/// rest of the resource belongs to the platform operator.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "platform.tenancy.dev",
    version = "v1alpha1",
    kind = "ServiceProvider",
    status = "ServiceProviderStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderSpec {
    /// Provider image/deployment details, opaque to the tenancy controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderStatus {
    /// Kinds this provider owns inside tenant namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<GroupVersionKind>,
}
