//! Workspace Provisioner - slash-command driven Kubernetes workspaces

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use workspace_provisioner::cluster::{self, KubeClusterClient};
use workspace_provisioner::gateway::{gateway_router, GatewayConfig, GatewayState};
use workspace_provisioner::notify::{HttpNotifier, KubeconfigSettings};
use workspace_provisioner::provisioner::{
    Provisioner, ProvisionerConfig, SecretWait, DEFAULT_POD_QUOTA,
};
use workspace_provisioner::{
    DEFAULT_CALLBACK_HOST, DEFAULT_LISTEN_ADDR, DEFAULT_NOTIFY_TIMEOUT_SECS,
    DEFAULT_POLL_INTERVAL_SECS,
};

/// Workspace Provisioner - per-user Kubernetes namespaces from a slash command
#[derive(Parser, Debug)]
#[command(name = "workspace-provisioner", version, about, long_about = None)]
struct Cli {
    /// Address the slash-command gateway listens on
    #[arg(long, env = "PROVISIONER_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: SocketAddr,

    /// Verification token every slash command must carry
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    shared_secret: String,

    /// API server address given to users
    ///
    /// Defaults to the address the provisioner itself connects to, which is
    /// usually wrong when running in-cluster.
    #[arg(long, env = "CLUSTER_SERVER")]
    cluster_server: Option<String>,

    /// Kubeconfig to use instead of in-cluster or inferred configuration
    #[arg(long, env = "KUBECONFIG_PATH")]
    kubeconfig: Option<PathBuf>,

    /// Hosts allowed in callback URLs
    #[arg(
        long = "allowed-callback-host",
        env = "ALLOWED_CALLBACK_HOSTS",
        value_delimiter = ',',
        default_value = DEFAULT_CALLBACK_HOST
    )]
    allowed_callback_hosts: Vec<String>,

    /// Maximum pods per workspace
    #[arg(long, default_value_t = DEFAULT_POD_QUOTA)]
    pod_quota: u32,

    /// How to wait for the service account token secret
    #[arg(long, value_enum, default_value_t = SecretWaitArg::Watch)]
    secret_wait: SecretWaitArg,

    /// Give up on the token secret after this many seconds
    #[arg(long, default_value_t = 30)]
    secret_timeout_secs: u64,

    /// Interval between reads when waiting by polling
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// kubeconfig context name used in the generated commands
    #[arg(long, default_value = "k8s-workspace")]
    context_name: String,

    /// Leave `--insecure-skip-tls-verify` out of the generated commands
    #[arg(long)]
    secure_tls: bool,

    /// Timeout for each callback notification in seconds
    #[arg(long, default_value_t = DEFAULT_NOTIFY_TIMEOUT_SECS)]
    notify_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SecretWaitArg {
    /// Watch service accounts for the secret reference
    Watch,
    /// Re-read the service account at a fixed interval
    Poll,
}

impl Cli {
    fn secret_wait(&self) -> SecretWait {
        match self.secret_wait {
            SecretWaitArg::Watch => SecretWait::Watch,
            SecretWaitArg::Poll => SecretWait::Poll {
                interval: Duration::from_secs(self.poll_interval_secs),
            },
        }
    }

    fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        if self.shared_secret.is_empty() {
            anyhow::bail!("shared secret must not be empty");
        }

        let allowed_callback_hosts: Vec<String> = self
            .allowed_callback_hosts
            .iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        if allowed_callback_hosts.is_empty() {
            anyhow::bail!("at least one callback host must be allowed");
        }

        Ok(GatewayConfig {
            shared_secret: self.shared_secret.clone(),
            allowed_callback_hosts,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube and reqwest pull in rustls; pick the provider explicitly
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let gateway_config = cli.gateway_config()?;

    let kube_config = cluster::load_config(cli.kubeconfig.as_deref()).await?;
    let cluster_server = cli
        .cluster_server
        .clone()
        .unwrap_or_else(|| cluster::server_address(&kube_config));
    let client = cluster::create_client(kube_config)?;

    let notifier = HttpNotifier::new(Duration::from_secs(cli.notify_timeout_secs))
        .context("failed to build notification client")?;

    let config = ProvisionerConfig {
        cluster_server,
        pod_quota: cli.pod_quota,
        secret_wait: cli.secret_wait(),
        secret_timeout: Duration::from_secs(cli.secret_timeout_secs),
        kubeconfig: KubeconfigSettings {
            context_name: cli.context_name.clone(),
            insecure_skip_tls_verify: !cli.secure_tls,
        },
    };
    tracing::info!(
        cluster_server = %config.cluster_server,
        pod_quota = config.pod_quota,
        secret_wait = ?config.secret_wait,
        "provisioner configured"
    );

    let provisioner = Arc::new(Provisioner::new(
        Arc::new(KubeClusterClient::new(client)),
        Arc::new(notifier),
        config,
    ));

    let shutdown = CancellationToken::new();
    let state = Arc::new(GatewayState::new(
        gateway_config,
        provisioner,
        shutdown.clone(),
    ));
    let app = gateway_router(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen_addr))?;
    tracing::info!(addr = %cli.listen_addr, "slash-command gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received, no longer accepting commands");
        })
        .await
        .context("gateway server failed")?;

    shutdown.cancel();
    let tasks = state.tasks();
    tasks.close();
    tracing::info!(in_flight = tasks.len(), "waiting for provisioning runs");
    tasks.wait().await;

    tracing::info!("shutdown complete");
    Ok(())
}
