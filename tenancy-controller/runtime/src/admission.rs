use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use k8s_openapi::api::authentication::v1::UserInfo;
use kube::{
    api::Api,
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        DynamicObject,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tenancy_controller_k8s_api::{
    roles_for_user, Member, MemberOverrides, Project, Role, TenancyKind, Workspace,
    CREATED_BY_ANNOTATION,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

const MUTATE_PROJECT_PATH: &str = "/mutate-core-tenancy-dev-v1alpha1-project";
const VALIDATE_PROJECT_PATH: &str = "/validate-core-tenancy-dev-v1alpha1-project";
const MUTATE_WORKSPACE_PATH: &str = "/mutate-core-tenancy-dev-v1alpha1-workspace";
const VALIDATE_WORKSPACE_PATH: &str = "/validate-core-tenancy-dev-v1alpha1-workspace";

/// Admission gate for tenancy objects: a mutating and a validating webhook
/// per kind, served on one TLS endpoint and dispatched by path.
#[derive(Clone)]
pub struct Admission {
    client: kube::Client,
    overrides_name: Option<String>,
    identity: String,
    disabled: bool,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = AdmissionReview<DynamicObject>;
type Body = http_body_util::Full<bytes::Bytes>;

#[derive(Copy, Clone, Debug)]
enum Phase {
    Mutate,
    Validate,
}

trait TenancyObject:
    Resource<DynamicType = ()> + DeserializeOwned + Clone + Debug + Send + Sync
{
    const KIND: TenancyKind;

    fn members(&self) -> &[Member];
}

impl TenancyObject for Project {
    const KIND: TenancyKind = TenancyKind::Project;

    fn members(&self) -> &[Member] {
        &self.spec.members
    }
}

impl TenancyObject for Workspace {
    const KIND: TenancyKind = TenancyKind::Workspace;

    fn members(&self) -> &[Member] {
        &self.spec.members
    }
}

/// The override singleton, as seen by one admission decision. Resolution
/// failures are carried so the decision can fail closed.
enum OverrideState {
    Disabled,
    Unavailable(String),
    Loaded(Box<MemberOverrides>),
}

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let phase = match req.uri().path() {
            MUTATE_PROJECT_PATH | MUTATE_WORKSPACE_PATH => Phase::Mutate,
            VALIDATE_PROJECT_PATH | VALIDATE_WORKSPACE_PATH => Phase::Validate,
            _ => return Box::pin(future::ok(not_found())),
        };
        if req.method() != http::Method::POST || self.disabled {
            return Box::pin(future::ok(not_found()));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(phase, req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        client: kube::Client,
        overrides_name: Option<String>,
        identity: String,
        disabled: bool,
    ) -> Self {
        Self {
            client,
            overrides_name,
            identity,
            disabled,
        }
    }

    async fn admit(self, phase: Phase, req: AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        if is_kind::<Project>(&req) {
            return match phase {
                Phase::Mutate => mutate(&req),
                Phase::Validate => self.validate::<Project>(req).await,
            };
        }

        if is_kind::<Workspace>(&req) {
            return match phase {
                Phase::Mutate => mutate(&req),
                Phase::Validate => self.validate::<Workspace>(req).await,
            };
        }

        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    async fn validate<K: TenancyObject>(
        &self,
        req: AdmissionRequest<DynamicObject>,
    ) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let object = match parse_object::<K>(req.object.as_ref()) {
            Ok(obj) => obj,
            Err(error) => return rsp.deny(error),
        };
        let old_object = match parse_object::<K>(req.old_object.as_ref()) {
            Ok(obj) => obj,
            Err(error) => return rsp.deny(error),
        };

        let overrides = self.load_overrides().await;
        let verdict = decide(
            &req.operation,
            old_object.as_ref(),
            object.as_ref(),
            &req.user_info,
            &self.identity,
            &overrides,
        );

        match verdict {
            Ok(()) => rsp,
            Err(reason) => {
                info!(
                    name = %req.name,
                    kind = %K::KIND,
                    operation = ?req.operation,
                    user = %req.user_info.username.as_deref().unwrap_or(""),
                    %reason,
                    "Denied"
                );
                rsp.deny(reason)
            }
        }
    }

    async fn load_overrides(&self) -> OverrideState {
        let Some(name) = self.overrides_name.as_deref() else {
            return OverrideState::Disabled;
        };
        let api: Api<MemberOverrides> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(overrides) => OverrideState::Loaded(Box::new(overrides)),
            Err(error) => OverrideState::Unavailable(error.to_string()),
        }
    }
}

/// The validating contract: `created-by` immutability, lock-out prevention
/// on both images, and the delete admin check, with the operator identity
/// exempt throughout. `Err` carries the denial reason.
fn decide<K: TenancyObject>(
    operation: &Operation,
    old: Option<&K>,
    new: Option<&K>,
    user: &UserInfo,
    identity: &str,
    overrides: &OverrideState,
) -> Result<(), String> {
    if user.username.as_deref() == Some(identity) {
        return Ok(());
    }

    match operation {
        Operation::Create => ensure_admin(new, user, overrides),
        Operation::Update => {
            verify_created_by_unchanged(old, new)?;
            ensure_admin(old, user, overrides)?;
            // The post-image must keep the requester as an admin as well, so
            // nobody edits themselves out of their own resource.
            ensure_admin(new, user, overrides)
        }
        Operation::Delete => ensure_admin(old, user, overrides),
        _ => Ok(()),
    }
}

fn ensure_admin<K: TenancyObject>(
    obj: Option<&K>,
    user: &UserInfo,
    overrides: &OverrideState,
) -> Result<(), String> {
    let Some(obj) = obj else {
        return Err("admission request is missing the object to evaluate".to_string());
    };
    if roles_for_user(obj.members(), user).contains(&Role::Admin) {
        return Ok(());
    }
    let by_override = match overrides {
        OverrideState::Disabled => false,
        OverrideState::Unavailable(error) => {
            return Err(format!("failed to resolve member overrides: {error}"));
        }
        OverrideState::Loaded(overrides) => {
            overrides.has_admin_override(user, &obj.name_any(), K::KIND)
        }
    };
    if by_override {
        return Ok(());
    }
    Err(format!(
        "requesting user {} will not be able to manage the resource, check the member list or use MemberOverrides",
        user.username.as_deref().unwrap_or("")
    ))
}

fn verify_created_by_unchanged<K: TenancyObject>(
    old: Option<&K>,
    new: Option<&K>,
) -> Result<(), String> {
    let created_by = |obj: Option<&K>| {
        obj.and_then(|o| o.meta().annotations.as_ref())
            .and_then(|annotations| annotations.get(CREATED_BY_ANNOTATION))
            .cloned()
    };
    if created_by(old) == created_by(new) {
        Ok(())
    } else {
        Err(format!("annotation {CREATED_BY_ANNOTATION} is immutable"))
    }
}

/// Mutating contract: on create, record the requester as the resource
/// creator.
fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let rsp = AdmissionResponse::from(req);
    if !matches!(req.operation, Operation::Create) {
        return rsp;
    }
    let username = req.user_info.username.clone().unwrap_or_default();

    let has_annotations = req
        .object
        .as_ref()
        .and_then(|obj| obj.metadata.annotations.as_ref())
        .map(|annotations| !annotations.is_empty())
        .unwrap_or(false);
    let ops = if has_annotations {
        // Escape the '/' of the annotation key per JSON pointer rules.
        let pointer = CREATED_BY_ANNOTATION.replace('/', "~1");
        serde_json::json!([{
            "op": "add",
            "path": format!("/metadata/annotations/{pointer}"),
            "value": username,
        }])
    } else {
        let mut annotations = serde_json::Map::new();
        annotations.insert(
            CREATED_BY_ANNOTATION.to_string(),
            serde_json::Value::String(username),
        );
        serde_json::json!([{
            "op": "add",
            "path": "/metadata/annotations",
            "value": annotations,
        }])
    };

    let patch: json_patch::Patch = match serde_json::from_value(ops) {
        Ok(patch) => patch,
        Err(error) => return AdmissionResponse::invalid(error),
    };
    match rsp.with_patch(patch) {
        Ok(rsp) => rsp,
        Err(error) => AdmissionResponse::invalid(error),
    }
}

fn parse_object<K: TenancyObject>(obj: Option<&DynamicObject>) -> Result<Option<K>, String> {
    obj.map(|obj| {
        obj.clone()
            .try_parse::<K>()
            .map_err(|error| format!("failed to parse {}: {error}", K::kind(&())))
    })
    .transpose()
}

fn is_kind<T>(req: &AdmissionRequest<DynamicObject>) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
