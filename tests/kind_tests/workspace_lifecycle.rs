//! Stories about a team member's workspace over its lifetime
//!
//! Each story drives the real provisioner against the cluster and checks the
//! objects left behind, the way the user would find them with kubectl.

use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, ListParams};
use tokio_util::sync::CancellationToken;

use workspace_provisioner::provisioner::{ProvisionOutcome, ProvisionRequest, Step};
use workspace_provisioner::USER_ID_LABEL;

use super::helpers::{
    cleanup_namespace, issue_legacy_token, test_client, test_provisioner, wait_for_namespace_gone,
    RecordingNotifier,
};

fn request(user_name: &str, user_id: &str) -> ProvisionRequest {
    ProvisionRequest {
        user_name: user_name.to_string(),
        user_id: user_id.to_string(),
        callback_url: "https://hooks.slack.com/commands/e2e".to_string(),
    }
}

/// Story: a team member asks for a workspace for the first time
///
/// Expected behavior:
/// - A namespace named after them exists, labeled with their user id
/// - Pods are capped at 10
/// - Their service account can edit the namespace
/// - They receive the four kubectl commands
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_member_gets_a_workspace() {
    let client = test_client().await;
    let namespace = "e2e-first-workspace";
    cleanup_namespace(&client, namespace).await;

    let notifier = RecordingNotifier::default();
    let provisioner = test_provisioner(client.clone(), notifier.clone());
    let issuer = issue_legacy_token(client.clone(), namespace, "e2e.first");

    let outcome = provisioner
        .run(&request("e2e.first", "ue2efirst"), CancellationToken::new())
        .await;
    issuer.abort();

    match &outcome {
        ProvisionOutcome::Completed { namespace: ns } => assert_eq!(ns.as_str(), namespace),
        other => panic!("Expected Completed, got {other:?}"),
    }

    let ns = Api::<Namespace>::all(client.clone())
        .get(namespace)
        .await
        .expect("namespace should exist");
    assert_eq!(
        ns.metadata
            .labels
            .unwrap_or_default()
            .get(USER_ID_LABEL)
            .map(String::as_str),
        Some("ue2efirst")
    );

    let quota = Api::<ResourceQuota>::namespaced(client.clone(), namespace)
        .get("resource-quotas")
        .await
        .expect("quota should exist");
    let pods = quota
        .spec
        .and_then(|s| s.hard)
        .and_then(|h| h.get("pods").cloned())
        .map(|q| q.0);
    assert_eq!(pods.as_deref(), Some("10"));

    Api::<ServiceAccount>::namespaced(client.clone(), namespace)
        .get("e2e.first")
        .await
        .expect("service account should exist");

    let binding = Api::<RoleBinding>::namespaced(client.clone(), namespace)
        .get("e2e.first-edit-binding")
        .await
        .expect("role binding should exist");
    assert_eq!(binding.role_ref.name, "edit");

    let messages = notifier.messages();
    assert_eq!(messages.len(), 2);
    let success = &messages[1];
    assert_eq!(success.attachments.len(), 4);
    assert!(success.attachments[2]
        .text
        .contains(&format!("--namespace={namespace}")));

    cleanup_namespace(&client, namespace).await;
}

/// Story: the same team member asks again
///
/// Their old workspace is deleted first. While it is still terminating the
/// new namespace cannot be created, and they are told so; once it is gone a
/// further request succeeds and only one labeled namespace exists.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_member_replaces_their_workspace() {
    let client = test_client().await;
    let namespace = "e2e-again-workspace";
    let user = request("e2e.again", "ue2eagain");
    cleanup_namespace(&client, namespace).await;

    let notifier = RecordingNotifier::default();
    let provisioner = test_provisioner(client.clone(), notifier.clone());

    let issuer = issue_legacy_token(client.clone(), namespace, "e2e.again");
    let first = provisioner.run(&user, CancellationToken::new()).await;
    issuer.abort();
    assert!(first.is_completed(), "first run failed: {first:?}");

    // Foreground deletion takes a while, so an immediate re-run may conflict
    let issuer = issue_legacy_token(client.clone(), namespace, "e2e.again");
    let second = provisioner.run(&user, CancellationToken::new()).await;
    issuer.abort();
    if let ProvisionOutcome::Failed { step, error } = &second {
        assert_eq!(*step, Step::CreateNamespace);
        assert!(error.is_conflict(), "unexpected failure: {error}");

        wait_for_namespace_gone(&client, namespace, Duration::from_secs(120)).await;
        let issuer = issue_legacy_token(client.clone(), namespace, "e2e.again");
        let third = provisioner.run(&user, CancellationToken::new()).await;
        issuer.abort();
        assert!(third.is_completed(), "third run failed: {third:?}");
    }

    let labeled = Api::<Namespace>::all(client.clone())
        .list(&ListParams::default().labels(&format!("{USER_ID_LABEL}=ue2eagain")))
        .await
        .expect("failed to list namespaces");
    assert_eq!(labeled.items.len(), 1);

    cleanup_namespace(&client, namespace).await;
}
