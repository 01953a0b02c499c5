//! Error types for workspace provisioning

use std::time::Duration;

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A resource with the requested name already exists
    ///
    /// Typically transient: a namespace from a previous run is still
    /// terminating, or two triggers for the same identity raced.
    #[error("resource conflict: {0}")]
    ResourceConflict(String),

    /// Any other cluster API failure (network, permissions, quota, bad data)
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of what failed
        message: String,
        /// Underlying kube-rs error, when the failure came from an API call
        #[source]
        source: Option<kube::Error>,
    },

    /// The service account's token secret did not appear in time
    #[error("no secret found for service account {service_account} after {waited:?}")]
    SecretTimeout {
        /// Service account that was being waited on
        service_account: String,
        /// How long the provisioner waited
        waited: Duration,
    },

    /// The run was cancelled (process shutdown) while waiting
    #[error("provisioning cancelled")]
    Cancelled,

    /// A step ran before the step that produces its input
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a cluster error with the given message and no API source
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error is a naming collision
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ResourceConflict(_))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 409 => {
                Self::ResourceConflict(resp.message.clone())
            }
            _ => Self::Cluster {
                message: e.to_string(),
                source: Some(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn already_exists_becomes_resource_conflict() {
        let err: Error = api_error(
            409,
            "AlreadyExists",
            "namespaces \"jane-doe-workspace\" already exists",
        )
        .into();

        assert!(err.is_conflict());
        assert!(err.to_string().contains("resource conflict"));
        assert!(err.to_string().contains("jane-doe-workspace"));
    }

    #[test]
    fn other_api_failures_become_cluster_errors() {
        let err: Error = api_error(403, "Forbidden", "namespaces is forbidden").into();

        match &err {
            Error::Cluster { source, .. } => assert!(source.is_some()),
            other => panic!("Expected Cluster variant, got {other:?}"),
        }
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn secret_timeout_names_the_account() {
        let err = Error::SecretTimeout {
            service_account: "jane.doe".to_string(),
            waited: Duration::from_secs(30),
        };

        assert!(err.to_string().contains("jane.doe"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn constructors_accept_str_and_string() {
        let err = Error::cluster("secret has no token");
        assert!(err.to_string().contains("secret has no token"));

        let err = Error::internal(format!("{} not resolved", "secret name"));
        assert_eq!(err.to_string(), "internal error: secret name not resolved");
    }
}
