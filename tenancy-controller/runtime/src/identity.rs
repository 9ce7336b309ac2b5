use anyhow::{anyhow, Result};
use k8s_openapi::api::authentication::v1::SelfSubjectReview;
use kube::api::{Api, PostParams};

/// The username the onboarding cluster reports for the operator's own
/// credentials. Admission checks exempt this identity.
pub async fn self_identity(client: &kube::Client) -> Result<String> {
    let api: Api<SelfSubjectReview> = Api::all(client.clone());
    let review = api
        .create(&PostParams::default(), &SelfSubjectReview::default())
        .await?;
    review
        .status
        .and_then(|status| status.user_info)
        .and_then(|user| user.username)
        .ok_or_else(|| anyhow!("self-subject review returned no username"))
}
