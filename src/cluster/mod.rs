//! Cluster API surface used by the provisioner
//!
//! [`ClusterClient`] abstracts the handful of Kubernetes operations the
//! provisioning workflow needs so the workflow can be exercised against mocks;
//! [`KubeClusterClient`] is the production implementation over kube-rs.

pub mod resources;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Default connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for the kube client
///
/// Watches are long-lived reads, so this stays well above any secret wait.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(295);

/// Trait abstracting the Kubernetes operations behind a workspace
///
/// Every method maps to one API call (or one watch) and surfaces failures as
/// [`Error`]: HTTP 409 on create becomes [`Error::ResourceConflict`],
/// anything else [`Error::Cluster`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Names of all namespaces matching a label selector
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<String>, Error>;

    /// Delete a namespace with foreground propagation and zero grace period
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error>;

    /// Create a resource quota inside a namespace
    async fn create_resource_quota(
        &self,
        namespace: &str,
        quota: &ResourceQuota,
    ) -> Result<(), Error>;

    /// Create a service account inside a namespace
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error>;

    /// Fetch a service account
    async fn get_service_account(&self, namespace: &str, name: &str)
        -> Result<ServiceAccount, Error>;

    /// Watch service accounts matching a label selector until one carries a
    /// token secret reference, and return that secret's name
    ///
    /// Has no timeout of its own; callers bound it.
    async fn wait_for_service_account_secret(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<String, Error>;

    /// Fetch a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;

    /// Create a role binding inside a namespace
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<String>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::foreground()
        };
        api.delete(name, &params).await?;
        Ok(())
    }

    #[instrument(skip(self, namespace), fields(namespace = ?namespace.metadata.name))]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace).await?;
        Ok(())
    }

    #[instrument(skip(self, quota))]
    async fn create_resource_quota(
        &self,
        namespace: &str,
        quota: &ResourceQuota,
    ) -> Result<(), Error> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), quota).await?;
        Ok(())
    }

    #[instrument(skip(self, account))]
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), account).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    #[instrument(skip(self))]
    async fn wait_for_service_account_secret(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<String, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().labels(label_selector);

        let stream = watcher(api, config).default_backoff().applied_objects();
        tokio::pin!(stream);

        while let Some(account) = stream
            .try_next()
            .await
            .map_err(|e| Error::cluster(format!("service account watch failed: {e}")))?
        {
            match resources::secret_reference(&account) {
                Some(secret) => return Ok(secret),
                None => debug!(
                    account = ?account.metadata.name,
                    "service account has no token secret yet"
                ),
            }
        }

        Err(Error::cluster("service account watch ended unexpectedly"))
    }

    #[instrument(skip(self))]
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    #[instrument(skip(self, binding))]
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), binding).await?;
        Ok(())
    }
}

/// Load client configuration from an optional kubeconfig path
///
/// Without a path the configuration is inferred: in-cluster service account
/// credentials when running in a pod, otherwise the local kubeconfig.
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Error> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::cluster(format!("failed to read kubeconfig: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::cluster(format!("failed to load kubeconfig: {e}")))
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::cluster(format!("failed to infer config: {e}"))),
    }
}

/// Create a kube client with the default connect and read timeouts
pub fn create_client(mut config: Config) -> Result<Client, Error> {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| Error::cluster(format!("failed to create client: {e}")))
}

/// API server address a client config points at, without a trailing slash
pub fn server_address(config: &Config) -> String {
    config.cluster_url.to_string().trim_end_matches('/').to_string()
}
