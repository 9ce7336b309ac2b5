use std::collections::HashMap;
use tenancy_controller_k8s_api::GroupVersionKind;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to discover resource names for apiVersion '{api_version}': {source}")]
    Request {
        api_version: String,
        #[source]
        source: kube::Error,
    },

    #[error(
        "unable to unambiguously determine resource name for kind '{kind}' with apiVersion \
         '{api_version}': found {count} potential matches: [{names}]"
    )]
    Ambiguous {
        kind: String,
        api_version: String,
        count: usize,
        names: String,
    },
}

/// Resolves a group/version/kind to the plural resource name the API server
/// uses for it. Pluggable so tests can substitute a fake.
#[async_trait::async_trait]
pub trait DiscoverResourceName: Send + Sync {
    async fn resource_name_for(&self, gvk: &GroupVersionKind) -> Result<String, DiscoveryError>;
}

/// Discovery against a live API server.
pub struct ApiDiscovery {
    client: kube::Client,
}

impl ApiDiscovery {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DiscoverResourceName for ApiDiscovery {
    async fn resource_name_for(&self, gvk: &GroupVersionKind) -> Result<String, DiscoveryError> {
        let api_version = gvk.api_version();
        let list = self
            .client
            .list_api_group_resources(&api_version)
            .await
            .map_err(|source| DiscoveryError::Request {
                api_version: api_version.clone(),
                source,
            })?;
        select_resource_name(
            gvk,
            list.resources.iter().map(|r| (r.kind.as_str(), r.name.as_str())),
        )
    }
}

/// Picks the unique non-subresource name matching the kind. Names containing
/// a '/' are subresources and never match.
pub(crate) fn select_resource_name<'a>(
    gvk: &GroupVersionKind,
    candidates: impl Iterator<Item = (&'a str, &'a str)>,
) -> Result<String, DiscoveryError> {
    let matches: Vec<&str> = candidates
        .filter(|(kind, name)| *kind == gvk.kind && !name.contains('/'))
        .map(|(_, name)| name)
        .collect();
    if matches.len() != 1 {
        return Err(DiscoveryError::Ambiguous {
            kind: gvk.kind.clone(),
            api_version: gvk.api_version(),
            count: matches.len(),
            names: matches.join(", "),
        });
    }
    Ok(matches[0].to_string())
}

/// Fixed discovery table for tests.
#[derive(Default)]
pub struct StaticDiscovery {
    // apiVersion -> [(kind, resource name)]
    resources: HashMap<String, Vec<(String, String)>>,
}

impl StaticDiscovery {
    pub fn with(mut self, api_version: &str, kind: &str, name: &str) -> Self {
        self.resources
            .entry(api_version.to_string())
            .or_default()
            .push((kind.to_string(), name.to_string()));
        self
    }
}

#[async_trait::async_trait]
impl DiscoverResourceName for StaticDiscovery {
    async fn resource_name_for(&self, gvk: &GroupVersionKind) -> Result<String, DiscoveryError> {
        let candidates = self
            .resources
            .get(&gvk.api_version())
            .map(Vec::as_slice)
            .unwrap_or_default();
        select_resource_name(
            gvk,
            candidates.iter().map(|(kind, name)| (kind.as_str(), name.as_str())),
        )
    }
}
