//! Slash-command HTTP gateway
//!
//! Accepts the chat platform's form-encoded slash-command POST, checks it,
//! and hands a [`ProvisionRequest`] to the [`Provisioner`] on a tracked
//! background task. The HTTP response is sent before provisioning starts;
//! everything after that reaches the requester through the callback URL.
//!
//! Checks run in a fixed order:
//! 1. form decodes and required fields are present (400)
//! 2. callback URL is `https` on an allow-listed host (400)
//! 3. shared secret matches (401)
//! 4. user id is usable as a label value (400)

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::naming;
use crate::provisioner::{ProvisionOutcome, ProvisionRequest, Provisioner};

/// Reasons a slash command is turned away
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Form did not decode or a field is empty or invalid
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Callback URL is not https or points at a host outside the allow-list
    #[error("callback url not allowed: {0}")]
    CallbackNotAllowed(String),

    /// Shared secret mismatch
    #[error("invalid token")]
    InvalidToken,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Malformed(_) => StatusCode::BAD_REQUEST,
            GatewayError::CallbackNotAllowed(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidToken => StatusCode::UNAUTHORIZED,
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Slash-command form fields
///
/// The platform sends more fields than these; unknown fields are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct SlashCommand {
    /// Verification token shared with the platform
    pub token: String,
    /// Requester's display name
    pub user_name: String,
    /// Requester's stable id
    pub user_id: String,
    /// Where to send notifications
    pub response_url: String,
    /// Command name, e.g. `/workspace`
    #[serde(default)]
    pub command: Option<String>,
    /// Team the command came from
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Gateway settings fixed at process start
#[derive(Clone)]
pub struct GatewayConfig {
    /// Secret every slash command must carry
    pub shared_secret: String,
    /// Hosts allowed in callback URLs, lowercase
    pub allowed_callback_hosts: Vec<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("shared_secret", &"<redacted>")
            .field("allowed_callback_hosts", &self.allowed_callback_hosts)
            .finish()
    }
}

/// Shared state behind the gateway routes
pub struct GatewayState {
    config: GatewayConfig,
    provisioner: Arc<Provisioner>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl GatewayState {
    /// Create gateway state; runs are cancelled when `shutdown` fires
    pub fn new(
        config: GatewayConfig,
        provisioner: Arc<Provisioner>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            provisioner,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Tracker holding every in-flight provisioning run
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Turn a slash command into a provisioning request, or reject it
    pub fn authorize(&self, command: SlashCommand) -> Result<ProvisionRequest, GatewayError> {
        let user_name = required("user_name", command.user_name)?;
        let user_id = required("user_id", command.user_id)?;
        let response_url = required("response_url", command.response_url)?;

        check_callback(&response_url, &self.config.allowed_callback_hosts)?;

        let token_matches = command
            .token
            .as_bytes()
            .ct_eq(self.config.shared_secret.as_bytes());
        if !bool::from(token_matches) {
            return Err(GatewayError::InvalidToken);
        }

        if !naming::is_valid_label_value(&user_id) {
            return Err(GatewayError::Malformed(format!(
                "user_id {user_id:?} is not a valid label value"
            )));
        }

        Ok(ProvisionRequest {
            user_name,
            user_id,
            callback_url: response_url,
        })
    }

    /// Start a provisioning run in the background
    fn spawn(&self, request: ProvisionRequest) {
        let provisioner = self.provisioner.clone();
        let cancel = self.shutdown.child_token();

        self.tasks.spawn(async move {
            match provisioner.run(&request, cancel).await {
                ProvisionOutcome::Completed { namespace } => {
                    debug!(namespace = %namespace, user_id = %request.user_id, "run completed")
                }
                ProvisionOutcome::Failed { step, error } => debug!(
                    user_id = %request.user_id,
                    step = %step,
                    error = %error,
                    "run failed"
                ),
            }
        });
    }
}

fn required(field: &str, value: String) -> Result<String, GatewayError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::Malformed(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Accept only https URLs whose host is in the allow-list
fn check_callback(url: &str, allowed_hosts: &[String]) -> Result<(), GatewayError> {
    let parsed =
        Url::parse(url).map_err(|e| GatewayError::CallbackNotAllowed(format!("{url}: {e}")))?;

    if parsed.scheme() != "https" {
        return Err(GatewayError::CallbackNotAllowed(format!(
            "{url}: scheme must be https"
        )));
    }

    let host = parsed.host_str().unwrap_or_default();
    if !allowed_hosts.iter().any(|allowed| allowed == host) {
        return Err(GatewayError::CallbackNotAllowed(format!(
            "{url}: host {host} is not allowed"
        )));
    }
    Ok(())
}

/// Slash-command endpoint handler
pub async fn slash_command_handler(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<SlashCommand>, FormRejection>,
) -> Result<StatusCode, GatewayError> {
    let Form(command) = form.map_err(|e| GatewayError::Malformed(e.body_text()))?;
    debug!(
        command = ?command.command,
        team_id = ?command.team_id,
        "slash command received"
    );

    let request = state.authorize(command).inspect_err(|e| {
        warn!(error = %e, "slash command rejected");
    })?;

    info!(
        user_name = %request.user_name,
        user_id = %request.user_id,
        "slash command accepted"
    );
    state.spawn(request);

    Ok(StatusCode::OK)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Create the gateway router
///
/// Routes:
/// - `POST /` - slash command (form-encoded)
/// - `GET /healthz` - liveness
pub fn gateway_router(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route("/", post(slash_command_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}
