use kube::{
    api::{Api, DynamicObject, ListParams, Patch, PatchParams},
    core::{ApiResource, GroupVersionKind},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tenancy_controller_k8s_api::{
    condition::{Condition, ConditionStatus},
    Member, Project, RemainingContent, TenancyKind, Workspace,
    CONDITION_CONTENT_REMAINING, DELETE_FINALIZER, EVENT_REASON_RECONCILE_FAILED,
    EVENT_REASON_RECONCILE_SUCCEEDED, REASON_RESOURCES_REMAINING,
};
use tenancy_controller_k8s_config::{
    store, Cluster, DeletionBlockingResource, SharedStore,
};
use tracing::{info, warn};

pub const CONTROLLER_NAME: &str = "tenancy-controller";

/// Delay before re-checking a deletion that is blocked on remaining content
/// or a draining namespace.
pub const BLOCKED_REQUEUE: Duration = Duration::from_secs(3);

pub const ERROR_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Store(#[from] store::Error),

    #[error("failed to serialize desired object: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("namespace '{0}' carries no project label")]
    ParentMissing(String),

    #[error("failed to perform cleanup operation: {0}")]
    Cleanup(#[source] kube::Error),
}

/// Signals a cleanup that made progress but needs another pass before the
/// finalizer may be removed.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("cleanup is not finished yet because there are remaining resources, checking again in {requeue_after:?}")]
    ResourcesRemaining { requeue_after: Duration },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Shared state of both tenancy reconcilers.
pub struct Context {
    pub store: SharedStore,
    pub recorder: Recorder,
}

impl Context {
    pub fn new(store: SharedStore) -> Arc<Self> {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: None,
        };
        let recorder = Recorder::new(store.static_onboarding().client(), reporter);
        Arc::new(Self { store, recorder })
    }

    pub async fn emit<K, T>(&self, obj: &K, result: &Result<T, Error>)
    where
        K: Resource<DynamicType = ()>,
    {
        let event = match result {
            Ok(_) => Event {
                type_: EventType::Normal,
                reason: EVENT_REASON_RECONCILE_SUCCEEDED.to_string(),
                note: Some("Reconciliation successful".to_string()),
                action: "Reconcile".to_string(),
                secondary: None,
            },
            Err(error) => Event {
                type_: EventType::Warning,
                reason: EVENT_REASON_RECONCILE_FAILED.to_string(),
                note: Some(error.to_string()),
                action: "Reconcile".to_string(),
                secondary: None,
            },
        };
        if let Err(error) = self.recorder.publish(&event, &obj.object_ref(&())).await {
            warn!(%error, "Failed to publish event");
        }
    }
}

/// The two tenancy kinds behind one capability surface, so the deletion
/// machinery is written once.
pub enum TenancyMut<'a> {
    Project(&'a mut Project),
    Workspace(&'a mut Workspace),
}

impl TenancyMut<'_> {
    pub fn kind(&self) -> TenancyKind {
        match self {
            TenancyMut::Project(_) => TenancyKind::Project,
            TenancyMut::Workspace(_) => TenancyKind::Workspace,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TenancyMut::Project(p) => p.name_any(),
            TenancyMut::Workspace(w) => w.name_any(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        match self {
            TenancyMut::Project(p) => p.meta().deletion_timestamp.is_some(),
            TenancyMut::Workspace(w) => w.meta().deletion_timestamp.is_some(),
        }
    }

    /// The namespace recorded on the status, once the first reconcile has
    /// created it.
    pub fn status_namespace(&self) -> Option<String> {
        let namespace = match self {
            TenancyMut::Project(p) => p.status.as_ref().map(|s| s.namespace.clone()),
            TenancyMut::Workspace(w) => w.status.as_ref().map(|s| s.namespace.clone()),
        };
        namespace.filter(|ns| !ns.is_empty())
    }

    pub fn members(&self) -> &[Member] {
        match self {
            TenancyMut::Project(p) => &p.spec.members,
            TenancyMut::Workspace(w) => &w.spec.members,
        }
    }

    pub fn set_or_update_condition(&mut self, c: Condition) {
        match self {
            TenancyMut::Project(p) => p.set_or_update_condition(c),
            TenancyMut::Workspace(w) => w.set_or_update_condition(c),
        }
    }

    pub fn remove_condition(&mut self, type_: &str) {
        match self {
            TenancyMut::Project(p) => p.remove_condition(type_),
            TenancyMut::Workspace(w) => w.remove_condition(type_),
        }
    }
}

pub fn has_delete_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == DELETE_FINALIZER)
}

/// Adds the deletion finalizer if absent. Safe to call repeatedly.
pub async fn ensure_finalizer<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if has_delete_finalizer(obj) {
        return Ok(());
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(DELETE_FINALIZER.to_string());
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let finalizers: Vec<&String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != DELETE_FINALIZER)
        .collect();
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// During deletion, scans the tenant namespace for instances of blocking
/// kinds through the dynamic handle. Sets or clears the `ContentRemaining`
/// condition and reports whether deletion is blocked.
pub async fn handle_remaining_content(
    dynamic: &Cluster,
    obj: &mut TenancyMut<'_>,
    blocking: &[DeletionBlockingResource],
) -> Result<bool, kube::Error> {
    if !obj.is_deleting() {
        return Ok(false);
    }
    let namespace = match obj.status_namespace() {
        Some(ns) => ns,
        // No namespace was ever created, so nothing can remain in it.
        None => return Ok(false),
    };

    let mut remaining = Vec::new();
    for res in blocking {
        let gvk = GroupVersionKind::gvk(&res.gvk.group, &res.gvk.version, &res.gvk.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &res.resource);
        let api: Api<DynamicObject> = Api::namespaced_with(dynamic.client(), &namespace, &ar);
        for item in api.list(&ListParams::default()).await?.items {
            remaining.push(RemainingContent {
                api_version: res.gvk.api_version(),
                kind: res.gvk.kind.clone(),
                namespace: item.namespace().unwrap_or_else(|| namespace.clone()),
                name: item.name_any(),
            });
        }
    }

    if remaining.is_empty() {
        obj.remove_condition(CONDITION_CONTENT_REMAINING);
        Ok(false)
    } else {
        info!(
            kind = %obj.kind(),
            name = %obj.name(),
            count = remaining.len(),
            "Deletion blocked by remaining content"
        );
        obj.set_or_update_condition(remaining_content_condition(&remaining, &namespace));
        Ok(true)
    }
}

/// Builds the `ContentRemaining` condition whose details enumerate the
/// resources preventing deletion.
pub fn remaining_content_condition(remaining: &[RemainingContent], namespace: &str) -> Condition {
    Condition {
        type_: CONDITION_CONTENT_REMAINING.to_string(),
        status: ConditionStatus::True,
        last_transition_time: None,
        reason: Some(REASON_RESOURCES_REMAINING.to_string()),
        message: Some(format!(
            "There are {} remaining resources in namespace {} that are preventing deletion",
            remaining.len(),
            namespace
        )),
        details: serde_json::to_value(remaining).ok(),
    }
}

pub enum DeleteFlow {
    /// The object carries no deletion timestamp.
    NotDeleting,
    /// Cleanup finished and the finalizer was removed (or was never held).
    Finished,
    /// Cleanup is still draining; check again after the delay.
    Requeue(Duration),
}

/// Finalizer-driven deletion. Runs `cleanup` while the finalizer is held;
/// a `ResourcesRemaining` signal requeues, a clean return removes the
/// finalizer.
pub async fn handle_delete<K, F, Fut>(api: &Api<K>, obj: &K, cleanup: F) -> Result<DeleteFlow, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), CleanupError>>,
{
    if obj.meta().deletion_timestamp.is_none() {
        return Ok(DeleteFlow::NotDeleting);
    }

    if has_delete_finalizer(obj) {
        match cleanup().await {
            Ok(()) => remove_finalizer(api, obj).await?,
            Err(CleanupError::ResourcesRemaining { requeue_after }) => {
                info!(name = %obj.name_any(), ?requeue_after, "Cleanup not finished, resources remaining");
                return Ok(DeleteFlow::Requeue(requeue_after));
            }
            Err(CleanupError::Kube(error)) => return Err(Error::Cleanup(error)),
        }
    }

    Ok(DeleteFlow::Finished)
}

/// Create-or-update via server-side apply. The type meta the server requires
/// for apply patches is injected from the static type information.
pub async fn apply<K>(api: &Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Debug,
{
    let name = obj.name_any();
    let mut value = serde_json::to_value(obj)?;
    value["apiVersion"] = K::api_version(&()).as_ref().into();
    value["kind"] = K::kind(&()).as_ref().into();
    api.patch(
        &name,
        &PatchParams::apply(CONTROLLER_NAME).force(),
        &Patch::Apply(&value),
    )
    .await?;
    Ok(())
}

/// Deletes ignoring not-found, for cleanup paths that must be idempotent.
pub async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(error) => Err(error),
    }
}
