//! Workspace provisioning workflow
//!
//! A run walks an ordered list of [`Step`]s. Each step either succeeds and
//! records what later steps need in the [`WorkspaceRun`], or fails; the
//! driver loop in [`Provisioner::run`] applies one policy to every failure:
//! log it, tell the requester, stop.
//!
//! # Sequence
//!
//! 1. CleanupPrior - delete namespaces labeled with the user id (best-effort)
//! 2. CreateNamespace
//! 3. ApplyQuota
//! 4. CreateServiceAccount
//! 5. AwaitSecret - bounded wait for the token secret reference
//! 6. FetchSecretValue
//! 7. BindRole
//! 8. NotifySuccess
//!
//! Runs for the same identity are not serialized. A second trigger racing
//! the first surfaces as [`Error::ResourceConflict`] at CreateNamespace.

mod secret;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::{resources, ClusterClient};
use crate::naming::{self, WorkspaceName};
use crate::notify::{KubeconfigSettings, KubectlCommands, Message, Notifier};
use crate::Error;

pub use secret::{await_secret_name, SecretTarget, SecretWait};

/// Default pod cap applied to every workspace
pub const DEFAULT_POD_QUOTA: u32 = 10;

/// Default bound on waiting for the token secret
pub const DEFAULT_SECRET_TIMEOUT: Duration = Duration::from_secs(30);

/// One slash-command invocation: who asked, and where to answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Chat display name (`jane.doe`)
    pub user_name: String,
    /// Stable chat user id (`U01ABCDEF`)
    pub user_id: String,
    /// URL that receives notifications for this run
    pub callback_url: String,
}

/// Provisioner settings fixed at process start
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    /// Externally reachable API server address put in the set-cluster command
    pub cluster_server: String,
    /// Maximum pods per workspace
    pub pod_quota: u32,
    /// How to wait for the token secret
    pub secret_wait: SecretWait,
    /// Upper bound on the secret wait
    pub secret_timeout: Duration,
    /// Naming of the generated kubeconfig entries
    pub kubeconfig: KubeconfigSettings,
}

impl ProvisionerConfig {
    /// Config with defaults for everything but the server address
    pub fn new(cluster_server: impl Into<String>) -> Self {
        Self {
            cluster_server: cluster_server.into(),
            pod_quota: DEFAULT_POD_QUOTA,
            secret_wait: SecretWait::default(),
            secret_timeout: DEFAULT_SECRET_TIMEOUT,
            kubeconfig: KubeconfigSettings::default(),
        }
    }
}

/// Steps of a provisioning run, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Delete namespaces left by earlier runs for the same user
    CleanupPrior,
    /// Create the workspace namespace
    CreateNamespace,
    /// Cap pods in the namespace
    ApplyQuota,
    /// Create the user's service account
    CreateServiceAccount,
    /// Wait for the token secret to be attached to the account
    AwaitSecret,
    /// Read the token out of the secret
    FetchSecretValue,
    /// Grant the account edit rights in the namespace
    BindRole,
    /// Send the kubectl instructions
    NotifySuccess,
}

impl Step {
    /// Every step, in the order a run executes them
    pub const SEQUENCE: [Step; 8] = [
        Step::CleanupPrior,
        Step::CreateNamespace,
        Step::ApplyQuota,
        Step::CreateServiceAccount,
        Step::AwaitSecret,
        Step::FetchSecretValue,
        Step::BindRole,
        Step::NotifySuccess,
    ];

    /// Text sent to the requester when this step fails
    pub fn failure_message(self, error: &Error) -> String {
        match self {
            Step::CleanupPrior | Step::CreateNamespace => {
                format!("failed to configure namespace: {error}")
            }
            Step::ApplyQuota | Step::CreateServiceAccount => {
                format!("failed to configure your namespace: {error}")
            }
            Step::AwaitSecret | Step::FetchSecretValue => {
                format!("failed to get account secret: {error}")
            }
            Step::BindRole => format!("failed to assign permissions: {error}"),
            Step::NotifySuccess => format!("failed to report your workspace: {error}"),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CleanupPrior => "cleanup-prior",
            Step::CreateNamespace => "create-namespace",
            Step::ApplyQuota => "apply-quota",
            Step::CreateServiceAccount => "create-service-account",
            Step::AwaitSecret => "await-secret",
            Step::FetchSecretValue => "fetch-secret-value",
            Step::BindRole => "bind-role",
            Step::NotifySuccess => "notify-success",
        };
        f.write_str(name)
    }
}

/// How a run ended
#[derive(Debug)]
pub enum ProvisionOutcome {
    /// Every step succeeded and the requester was sent their instructions
    Completed {
        /// The workspace namespace
        namespace: WorkspaceName,
    },
    /// A step failed; the requester was told and the run stopped
    Failed {
        /// The step that failed
        step: Step,
        /// Why
        error: Error,
    },
}

impl ProvisionOutcome {
    /// Whether the run completed
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// State accumulated while a run progresses
#[derive(Debug)]
pub struct WorkspaceRun {
    /// Workspace namespace
    pub namespace: WorkspaceName,
    /// Service account name
    pub service_account: String,
    /// Label selector for the user's objects
    pub selector: String,
    secret_name: Option<String>,
    token: Option<String>,
}

impl WorkspaceRun {
    /// Derive every name a run uses from the request
    pub fn new(request: &ProvisionRequest) -> Self {
        Self {
            namespace: naming::workspace_name(&request.user_name),
            service_account: naming::service_account_name(&request.user_name),
            selector: naming::user_selector(&request.user_id),
            secret_name: None,
            token: None,
        }
    }

    fn secret_name(&self) -> Result<&str, Error> {
        self.secret_name
            .as_deref()
            .ok_or_else(|| Error::internal("secret name read before it was resolved"))
    }

    fn token(&self) -> Result<&str, Error> {
        self.token
            .as_deref()
            .ok_or_else(|| Error::internal("token read before it was fetched"))
    }
}

/// Runs the provisioning workflow against a cluster
///
/// Holds only shared, read-only handles; one instance serves every trigger.
pub struct Provisioner {
    cluster: Arc<dyn ClusterClient>,
    notifier: Arc<dyn Notifier>,
    config: ProvisionerConfig,
}

impl Provisioner {
    /// Create a provisioner
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        notifier: Arc<dyn Notifier>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            cluster,
            notifier,
            config,
        }
    }

    /// Provisioner settings
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Provision a workspace for the requester
    ///
    /// Never returns an error: failures are logged and reported to the
    /// callback URL. The outcome is returned for logging.
    pub async fn run(
        &self,
        request: &ProvisionRequest,
        cancel: CancellationToken,
    ) -> ProvisionOutcome {
        let mut run = WorkspaceRun::new(request);
        info!(
            namespace = %run.namespace,
            user_id = %request.user_id,
            "provisioning workspace"
        );

        self.notify(
            request,
            &Message::text(format!(
                "configuring namespace [{}], hang tight",
                run.namespace
            )),
        )
        .await;

        for step in Step::SEQUENCE {
            info!(namespace = %run.namespace, step = %step, "running step");
            if let Err(error) = self.execute(step, request, &mut run, &cancel).await {
                error!(
                    namespace = %run.namespace,
                    step = %step,
                    error = %error,
                    "workspace provisioning failed"
                );
                self.notify(request, &Message::text(step.failure_message(&error)))
                    .await;
                return ProvisionOutcome::Failed { step, error };
            }
        }

        info!(namespace = %run.namespace, "workspace ready");
        ProvisionOutcome::Completed {
            namespace: run.namespace,
        }
    }

    async fn execute(
        &self,
        step: Step,
        request: &ProvisionRequest,
        run: &mut WorkspaceRun,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let ns = run.namespace.as_str();
        match step {
            Step::CleanupPrior => {
                self.cleanup_prior(run).await;
            }
            Step::CreateNamespace => {
                info!(namespace = %ns, "creating namespace");
                self.cluster
                    .create_namespace(&resources::namespace(&run.namespace, &request.user_id))
                    .await?;
            }
            Step::ApplyQuota => {
                info!(namespace = %ns, pods = self.config.pod_quota, "setting quota");
                let quota = resources::resource_quota(&run.namespace, self.config.pod_quota);
                self.cluster.create_resource_quota(ns, &quota).await?;
            }
            Step::CreateServiceAccount => {
                info!(namespace = %ns, account = %run.service_account, "creating service account");
                let account = resources::service_account(
                    &run.namespace,
                    &run.service_account,
                    &request.user_id,
                );
                self.cluster.create_service_account(ns, &account).await?;
            }
            Step::AwaitSecret => {
                let target = SecretTarget {
                    namespace: ns,
                    service_account: &run.service_account,
                    selector: &run.selector,
                };
                let name = await_secret_name(
                    self.cluster.as_ref(),
                    self.config.secret_wait,
                    &target,
                    self.config.secret_timeout,
                    cancel,
                )
                .await?;
                info!(namespace = %ns, secret = %name, "service account secret attached");
                run.secret_name = Some(name);
            }
            Step::FetchSecretValue => {
                let name = run.secret_name()?;
                info!(namespace = %ns, secret = %name, "reading account token");
                let secret = self.cluster.get_secret(ns, name).await?;
                run.token = Some(resources::secret_token(&secret)?);
            }
            Step::BindRole => {
                let name = naming::role_binding_name(&run.service_account);
                info!(namespace = %ns, binding = %name, "binding edit role");
                let binding =
                    resources::edit_role_binding(&run.namespace, &name, &run.service_account);
                self.cluster.create_role_binding(ns, &binding).await?;
            }
            Step::NotifySuccess => {
                let commands = KubectlCommands::new(
                    &self.config.kubeconfig,
                    &self.config.cluster_server,
                    run.token()?,
                    ns,
                );
                self.notify(request, &Message::workspace_ready(&commands))
                    .await;
            }
        }
        Ok(())
    }

    /// Delete every namespace carrying the user's label
    ///
    /// Failures are logged and otherwise ignored; a namespace still
    /// terminating shows up later as a conflict on create.
    async fn cleanup_prior(&self, run: &WorkspaceRun) {
        let namespaces = match self.cluster.list_namespaces(&run.selector).await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                warn!(selector = %run.selector, error = %e, "failed to list prior namespaces");
                return;
            }
        };

        for name in namespaces {
            match self.cluster.delete_namespace(&name).await {
                Ok(()) => info!(namespace = %name, "deleted prior namespace"),
                Err(e) => warn!(namespace = %name, error = %e, "failed to delete prior namespace"),
            }
        }
    }

    async fn notify(&self, request: &ProvisionRequest, message: &Message) {
        self.notifier.send(&request.callback_url, message).await;
    }
}
