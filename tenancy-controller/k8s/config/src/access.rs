use crate::cluster::Cluster;
use k8s_openapi::api::{core::v1::Secret, rbac::v1::PolicyRule};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use std::time::Duration;
use tenancy_controller_k8s_api::{
    AccessRequest, AccessRequestPhase, AccessRequestSpec, Resource,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "tenancy-controller";
const DEFAULT_RETRY: Duration = Duration::from_secs(10);
const KUBECONFIG_KEY: &str = "kubeconfig";

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("granted access request '{0}' has no secret reference")]
    MissingSecret(String),

    #[error("access secret '{namespace}/{name}' has no '{KUBECONFIG_KEY}' key")]
    MissingKubeconfig { namespace: String, name: String },

    #[error("invalid kubeconfig in access secret: {0}")]
    Kubeconfig(String),

    #[error("failed to serialize access request: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of submitting a permission grant.
pub enum AccessStatus {
    /// The grant is materialized and a client with those permissions is
    /// available.
    Granted(Cluster),
    /// The broker has not yet satisfied the grant; retry after the
    /// advertised interval.
    Pending { retry_after: Duration },
}

/// Materializes clients whose permissions follow a submitted grant. The
/// production implementation speaks to the platform's access broker; tests
/// substitute a fake.
#[async_trait::async_trait]
pub trait AccessBroker: Send + Sync {
    async fn ensure(&self, rules: &[PolicyRule]) -> Result<AccessStatus, AccessError>;
    async fn revoke(&self) -> Result<(), AccessError>;
}

/// Broker backed by an `AccessRequest` object on the platform cluster. The
/// request carries the desired rules; once the platform grants it, the
/// referenced secret holds a kubeconfig for the issued credentials. The
/// built client is cached and reused while the rules are unchanged, so
/// callers get a stable handle.
pub struct AccessRequestBroker {
    platform: Cluster,
    name: String,
    namespace: String,
    target_cluster: String,
    cached: Mutex<Option<(Vec<PolicyRule>, Cluster)>>,
}

impl AccessRequestBroker {
    pub fn new(
        platform: Cluster,
        name: impl Into<String>,
        namespace: impl Into<String>,
        target_cluster: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            name: name.into(),
            namespace: namespace.into(),
            target_cluster: target_cluster.into(),
            cached: Mutex::new(None),
        }
    }

    fn api(&self) -> Api<AccessRequest> {
        Api::namespaced(self.platform.client(), &self.namespace)
    }

    async fn client_from_secret(&self, namespace: &str, name: &str) -> Result<Cluster, AccessError> {
        let secrets: Api<Secret> = Api::namespaced(self.platform.client(), namespace);
        let secret = secrets.get(name).await?;
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| AccessError::MissingKubeconfig {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        let yaml = String::from_utf8(bytes.0.clone())
            .map_err(|error| AccessError::Kubeconfig(error.to_string()))?;
        let kubeconfig = Kubeconfig::from_yaml(&yaml)
            .map_err(|error| AccessError::Kubeconfig(error.to_string()))?;
        let config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|error| AccessError::Kubeconfig(error.to_string()))?;
        let client = kube::Client::try_from(config)
            .map_err(|error| AccessError::Kubeconfig(error.to_string()))?;
        Ok(Cluster::new(self.target_cluster.clone(), client))
    }
}

#[async_trait::async_trait]
impl AccessBroker for AccessRequestBroker {
    async fn ensure(&self, rules: &[PolicyRule]) -> Result<AccessStatus, AccessError> {
        let mut cached = self.cached.lock().await;
        if let Some((granted_rules, cluster)) = cached.as_ref() {
            if granted_rules == rules {
                return Ok(AccessStatus::Granted(cluster.clone()));
            }
        }

        let desired = AccessRequest::new(
            &self.name,
            AccessRequestSpec {
                cluster: self.target_cluster.clone(),
                permissions: rules.to_vec(),
            },
        );
        let mut value = serde_json::to_value(&desired)?;
        value["apiVersion"] = AccessRequest::api_version(&()).as_ref().into();
        value["kind"] = AccessRequest::kind(&()).as_ref().into();
        let observed = self
            .api()
            .patch(
                &self.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&value),
            )
            .await?;

        let status = observed.status.unwrap_or_default();
        if status.phase != AccessRequestPhase::Granted
            || observed.spec.permissions != rules
        {
            let retry_after = status
                .retry_after_seconds
                .map(|secs| Duration::from_secs(secs.into()))
                .unwrap_or(DEFAULT_RETRY);
            debug!(name = %self.name, ?retry_after, "Access request not granted yet");
            return Ok(AccessStatus::Pending { retry_after });
        }

        let secret_ref = status
            .secret_ref
            .ok_or_else(|| AccessError::MissingSecret(self.name.clone()))?;
        let secret_namespace = secret_ref.namespace.as_deref().unwrap_or(&self.namespace);
        let secret_name = secret_ref
            .name
            .as_deref()
            .ok_or_else(|| AccessError::MissingSecret(self.name.clone()))?;
        let cluster = self.client_from_secret(secret_namespace, secret_name).await?;
        info!(name = %self.name, cluster = %cluster.id(), "Access request granted");
        *cached = Some((rules.to_vec(), cluster.clone()));
        Ok(AccessStatus::Granted(cluster))
    }

    async fn revoke(&self) -> Result<(), AccessError> {
        self.cached.lock().await.take();
        match self.api().delete(&self.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
