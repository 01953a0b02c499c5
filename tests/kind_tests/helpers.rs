//! Shared fixtures for the end-to-end stories

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tokio::task::JoinHandle;

use workspace_provisioner::cluster::KubeClusterClient;
use workspace_provisioner::notify::{Message, Notifier};
use workspace_provisioner::provisioner::{Provisioner, ProvisionerConfig};

/// Address put in the generated set-cluster command
pub const TEST_SERVER: &str = "https://127.0.0.1:6443";

/// Connect to the cluster in the current kubeconfig context
pub async fn test_client() -> Client {
    Client::try_default()
        .await
        .expect("no cluster available; create one with `kind create cluster`")
}

/// Notifier that keeps every message in memory
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, _callback_url: &str, message: &Message) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

/// Provisioner wired to the real cluster and an in-memory notifier
pub fn test_provisioner(client: Client, notifier: RecordingNotifier) -> Provisioner {
    let mut config = ProvisionerConfig::new(TEST_SERVER);
    config.secret_timeout = Duration::from_secs(60);
    Provisioner::new(
        Arc::new(KubeClusterClient::new(client)),
        Arc::new(notifier),
        config,
    )
}

/// Stand in for the legacy token controller
///
/// Clusters since 1.24 no longer create token secrets for service accounts.
/// Once the account exists, create a token secret for it, wait for the
/// cluster to fill in the token, then reference the secret from the account.
pub fn issue_legacy_token(client: Client, namespace: &str, account: &str) -> JoinHandle<()> {
    let namespace = namespace.to_string();
    let account = account.to_string();

    tokio::spawn(async move {
        let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), &namespace);
        let secrets: Api<Secret> = Api::namespaced(client, &namespace);
        let secret_name = format!("{account}-token-e2e");

        while accounts.get_opt(&account).await.ok().flatten().is_none() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                annotations: Some(BTreeMap::from([(
                    "kubernetes.io/service-account.name".to_string(),
                    account.clone(),
                )])),
                ..Default::default()
            },
            type_: Some("kubernetes.io/service-account-token".to_string()),
            ..Default::default()
        };
        secrets
            .create(&PostParams::default(), &secret)
            .await
            .expect("failed to create token secret");

        loop {
            let populated = secrets
                .get(&secret_name)
                .await
                .ok()
                .and_then(|s| s.data)
                .is_some_and(|data| data.contains_key("token"));
            if populated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let patch = serde_json::json!({ "secrets": [{ "name": secret_name }] });
        accounts
            .patch(&account, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .expect("failed to attach token secret");
    })
}

/// Wait until a namespace has been fully removed
pub async fn wait_for_namespace_gone(client: &Client, name: &str, timeout: Duration) {
    let api: Api<Namespace> = Api::all(client.clone());
    let deadline = tokio::time::Instant::now() + timeout;
    while api.get_opt(name).await.ok().flatten().is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "namespace {name} still present after {timeout:?}"
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Remove a namespace left by a previous test run
pub async fn cleanup_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::foreground()).await;
    wait_for_namespace_gone(client, name, Duration::from_secs(120)).await;
}
