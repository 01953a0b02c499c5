//! Waiting for a service account's token secret
//!
//! The cluster's token controller attaches the secret some time after the
//! account is created. Both strategies below are bounded by a timeout and a
//! cancellation token; neither retries beyond that bound.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cluster::{resources, ClusterClient};
use crate::Error;

/// How to observe the secret reference appearing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecretWait {
    /// Watch service accounts carrying the user label until one is updated
    /// with a secret reference
    #[default]
    Watch,
    /// Re-read the service account at a fixed interval
    Poll {
        /// Delay before each read
        interval: Duration,
    },
}

/// The account being waited on
pub struct SecretTarget<'a> {
    /// Namespace holding the account
    pub namespace: &'a str,
    /// Service account name
    pub service_account: &'a str,
    /// Label selector matching the account
    pub selector: &'a str,
}

/// Resolve the name of the token secret attached to a service account
///
/// Fails with [`Error::SecretTimeout`] once `timeout` elapses and with
/// [`Error::Cancelled`] if `cancel` fires first.
pub async fn await_secret_name(
    cluster: &dyn ClusterClient,
    strategy: SecretWait,
    target: &SecretTarget<'_>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    let wait = async {
        match strategy {
            SecretWait::Watch => {
                cluster
                    .wait_for_service_account_secret(target.namespace, target.selector)
                    .await
            }
            SecretWait::Poll { interval } => poll_secret_name(cluster, target, interval).await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, wait) => match result {
            Ok(found) => found,
            Err(_) => Err(Error::SecretTimeout {
                service_account: target.service_account.to_string(),
                waited: timeout,
            }),
        },
    }
}

/// Poll until the account references a secret
///
/// Read errors end the wait; only an absent reference keeps polling.
async fn poll_secret_name(
    cluster: &dyn ClusterClient,
    target: &SecretTarget<'_>,
    interval: Duration,
) -> Result<String, Error> {
    loop {
        tokio::time::sleep(interval).await;

        let account = cluster
            .get_service_account(target.namespace, target.service_account)
            .await?;
        if let Some(secret) = resources::secret_reference(&account) {
            debug!(secret = %secret, "service account secret attached");
            return Ok(secret);
        }
        trace!(account = %target.service_account, "no secret reference yet");
    }
}
