//! Requester notifications
//!
//! Messages are Slack-compatible JSON payloads POSTed to the callback URL
//! that arrived with the slash command. Delivery is best-effort: failures are
//! logged and never retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

/// Docs link shown to users who do not have kubectl yet
const INSTALL_KUBECTL_URL: &str = "https://kubernetes.io/docs/tasks/tools/install-kubectl/";

/// Where a message should appear in the chat channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Visible to the whole channel
    InChannel,
    /// Visible only to the requester
    Ephemeral,
}

/// One titled block of a rich message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Heading shown above the block
    pub pretext: String,
    /// Block body
    pub text: String,
}

/// Message delivered to a callback URL
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Main message text
    pub text: String,
    /// Channel visibility
    pub response_type: ResponseType,
    /// Extra blocks (empty for plain messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// A plain progress or failure line
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response_type: ResponseType::InChannel,
            attachments: Vec::new(),
        }
    }

    /// The success message carrying the four kubectl commands
    pub fn workspace_ready(commands: &KubectlCommands) -> Self {
        let step = |pretext: &str, command: &str| Attachment {
            pretext: pretext.to_string(),
            text: format!("`{command}`"),
        };

        Self {
            text: format!(
                ":tada: namespace configured! :tada:\n go <{INSTALL_KUBECTL_URL}|install kubectl> \
                 then execute the following commands:"
            ),
            response_type: ResponseType::InChannel,
            attachments: vec![
                step("create a kube config entry for the cluster", &commands.set_cluster),
                step("create a kube config entry for your account", &commands.set_credentials),
                step(
                    "create a kube config context that links your account and the cluster",
                    &commands.set_context,
                ),
                step("tell kubectl to use the context by default", &commands.use_context),
            ],
        }
    }
}

/// How the generated kubeconfig entries are named and secured
#[derive(Clone, Debug)]
pub struct KubeconfigSettings {
    /// Context name; the cluster and user entries are derived from it
    pub context_name: String,
    /// Add `--insecure-skip-tls-verify=true` to the set-cluster command
    pub insecure_skip_tls_verify: bool,
}

impl Default for KubeconfigSettings {
    fn default() -> Self {
        Self {
            context_name: "k8s-workspace".to_string(),
            insecure_skip_tls_verify: true,
        }
    }
}

/// The commands a user runs to point kubectl at their workspace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KubectlCommands {
    /// `kubectl config set-cluster ...`
    pub set_cluster: String,
    /// `kubectl config set-credentials ...`
    pub set_credentials: String,
    /// `kubectl config set-context ...`
    pub set_context: String,
    /// `kubectl config use-context ...`
    pub use_context: String,
}

impl KubectlCommands {
    /// Build the commands for a workspace
    pub fn new(settings: &KubeconfigSettings, server: &str, token: &str, namespace: &str) -> Self {
        let context = &settings.context_name;
        let cluster = format!("{context}-cluster");
        let user = format!("{context}-user");
        let tls = if settings.insecure_skip_tls_verify {
            " --insecure-skip-tls-verify=true"
        } else {
            ""
        };

        Self {
            set_cluster: format!("kubectl config set-cluster {cluster} --server={server}{tls}"),
            set_credentials: format!("kubectl config set-credentials {user} --token={token}"),
            set_context: format!(
                "kubectl config set-context {context} --cluster={cluster} \
                 --user={user} --namespace={namespace}"
            ),
            use_context: format!("kubectl config use-context {context}"),
        }
    }
}

/// Delivers messages to a requester's callback address
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message; failures are logged by the implementation
    async fn send(&self, callback_url: &str, message: &Message);
}

/// Notifier that POSTs JSON to the callback URL
pub struct HttpNotifier {
    http: reqwest::Client,
}

impl HttpNotifier {
    /// Create a notifier whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, callback_url: &str, message: &Message) {
        let response = match self.http.post(callback_url).json(message).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, text = %message.text, "failed to send notification");
                return;
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "notification delivered");
            return;
        }

        match response.text().await {
            Ok(body) => warn!(
                status = %status,
                body = %body,
                text = %message.text,
                "notification rejected by callback"
            ),
            Err(e) => warn!(
                status = %status,
                error = %e,
                text = %message.text,
                "notification rejected by callback, response unreadable"
            ),
        }
    }
}
