//! Workspace Provisioner - per-user Kubernetes workspaces from a chat slash command
//!
//! A team member types a slash command; the gateway verifies it and the
//! provisioner gives them a fresh namespace with a pod quota, a service
//! account with edit rights inside it, and the kubectl commands to use it.
//! Running the command again tears the old workspace down first.
//!
//! # Modules
//!
//! - [`gateway`] - HTTP endpoint receiving slash commands
//! - [`provisioner`] - The step-by-step workspace workflow
//! - [`cluster`] - Kubernetes operations and object builders
//! - [`notify`] - Messages sent back to the requester
//! - [`naming`] - Deterministic resource names derived from the user
//! - [`error`] - Error types for the workflow

#![deny(missing_docs)]

pub mod cluster;
pub mod error;
pub mod gateway;
pub mod naming;
pub mod notify;
pub mod provisioner;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key carrying the chat user id on every per-user object
///
/// Prior workspaces are found by this label, so it must never change.
pub const USER_ID_LABEL: &str = "userId";

/// Default address the gateway listens on
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default host allowed in callback URLs
pub const DEFAULT_CALLBACK_HOST: &str = "hooks.slack.com";

/// Default interval for the polling secret wait
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Default timeout for callback notifications
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
