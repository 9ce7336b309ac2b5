use crate::{admission::Admission, identity};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::api::Api;
use std::sync::Arc;
use tenancy_controller_k8s_api::{labels, ProjectWorkspaceConfig};
use tenancy_controller_k8s_config::{
    AccessBroker, AccessRequestBroker, AccessStatus, ApiDiscovery, Cluster, ConfigController,
    ConfigStore,
};
use tenancy_controller_k8s_tenancy::{
    Context, ProjectController, RbacSetup, WorkspaceController,
};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "tenancy-controller", about = "Tenancy access and lifecycle controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "tenancy=info,warn",
        env = "TENANCY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Environment name. Distinguishes operators watching the same
    /// onboarding cluster; must be globally unique.
    #[clap(long)]
    environment: String,

    /// Name of the provider registration; also the name of the
    /// configuration singleton honored by the config reconciler.
    #[clap(long)]
    provider_name: String,

    /// Name of the MemberOverrides singleton consulted by the webhooks.
    /// Takes precedence over the name in the configuration object.
    #[clap(long = "use-member-overrides")]
    use_member_overrides: Option<String>,

    /// Namespace the operator runs in; access requests are created here.
    #[clap(long, env = "POD_NAMESPACE", default_value = "default")]
    pod_namespace: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::Subcommand)]
enum Command {
    /// Prepare platform-side access for installers; CRDs, webhook
    /// configurations and certificates are installed by external tooling.
    Init,
    /// Run the reconcilers and the admission server.
    Run,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            environment,
            provider_name,
            use_member_overrides,
            pod_namespace,
            command,
        } = self;

        if environment.is_empty() {
            bail!("environment must not be empty");
        }
        if provider_name.is_empty() {
            bail!("provider-name must not be empty");
        }

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        info!(%environment, %provider_name, "Starting");
        let platform = Cluster::new("platform", runtime.client());

        if let Command::Init = command {
            let broker = AccessRequestBroker::new(
                platform,
                format!("{provider_name}-onboarding-init"),
                pod_namespace,
                "onboarding",
            );
            let cluster = wait_for_access(&broker, &init_rules()).await?;
            info!(cluster = %cluster.id(), "Onboarding access for installation is ready");
            return Ok(());
        }

        // Static onboarding access with the fixed permission set.
        let static_broker = AccessRequestBroker::new(
            platform.clone(),
            format!("{provider_name}-onboarding"),
            pod_namespace.clone(),
            "onboarding",
        );
        let onboarding = wait_for_access(&static_broker, &static_onboarding_rules()).await?;

        let operator_identity = identity::self_identity(&onboarding.client()).await?;
        info!(identity = %operator_identity, "Determined own identity to exclude from webhook validation");

        let configs: Api<ProjectWorkspaceConfig> = Api::all(platform.client());
        let config = configs
            .get(&provider_name)
            .await
            .with_context(|| format!("unable to get ProjectWorkspaceConfig '{provider_name}'"))?;

        let overrides_name = use_member_overrides
            .or_else(|| config.spec.member_overrides_name.clone())
            .filter(|name| !name.is_empty());

        RbacSetup::new(onboarding.client(), config.spec.clone())
            .ensure_resources()
            .await
            .context("unable to create or update static RBAC resources")?;

        let store = ConfigStore::shared(onboarding.clone());

        let discovery = Arc::new(ApiDiscovery::new(onboarding.client()));
        let dynamic_broker = Arc::new(AccessRequestBroker::new(
            platform.clone(),
            format!("{provider_name}-onboarding-dynamic"),
            pod_namespace,
            "onboarding",
        ));
        let config_controller = ConfigController::new(
            provider_name,
            platform,
            store.clone(),
            discovery,
            dynamic_broker,
        );
        tokio::spawn(config_controller.run().instrument(info_span!("config")));

        let ctx = Context::new(store);
        tokio::spawn(ProjectController::run(ctx.clone()).instrument(info_span!("projects")));
        tokio::spawn(WorkspaceController::run(ctx.clone()).instrument(info_span!("workspaces")));

        if config.spec.webhook.disabled {
            info!("Admission webhooks are disabled by configuration");
        }
        let admission = Admission::new(
            onboarding.client(),
            overrides_name,
            operator_identity,
            config.spec.webhook.disabled,
        );
        let runtime = runtime.spawn_server(move || admission);

        // Block on the shutdown signal; background tasks drain before exit.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }
        Ok(())
    }
}

async fn wait_for_access(broker: &AccessRequestBroker, rules: &[PolicyRule]) -> Result<Cluster> {
    loop {
        match broker.ensure(rules).await? {
            AccessStatus::Granted(cluster) => return Ok(cluster),
            AccessStatus::Pending { retry_after } => {
                info!(?retry_after, "Waiting for onboarding cluster access");
                tokio::time::sleep(retry_after).await;
            }
        }
    }
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// Fixed permissions of the static onboarding handle: tenancy objects,
/// namespaces and secrets, the RBAC objects the reconcilers manage, and
/// self-subject reviews for identity discovery.
fn static_onboarding_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &[labels::GROUP],
            &[
                "projects",
                "projects/status",
                "workspaces",
                "workspaces/status",
                "memberoverrides",
            ],
            &["*"],
        ),
        rule(&[""], &["namespaces", "secrets"], &["*"]),
        rule(
            &["rbac.authorization.k8s.io"],
            &["clusterroles", "clusterrolebindings", "rolebindings"],
            &["*"],
        ),
        rule(
            &["authentication.k8s.io"],
            &["selfsubjectreviews"],
            &["create"],
        ),
    ]
}

/// Permissions the external installers need; requested by `init` so the
/// CRD and webhook installation that follows can proceed.
fn init_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &["apiextensions.k8s.io"],
            &["customresourcedefinitions"],
            &["*"],
        ),
        rule(
            &["admissionregistration.k8s.io"],
            &[
                "mutatingwebhookconfigurations",
                "validatingwebhookconfigurations",
            ],
            &["*"],
        ),
        rule(&[""], &["secrets", "services"], &["*"]),
    ]
}
