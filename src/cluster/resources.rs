//! Typed Kubernetes objects created for a workspace
//!
//! Builders are pure so the exact shape of every object can be asserted
//! without a cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Namespace, ResourceQuota, ResourceQuotaSpec, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::naming::WorkspaceName;
use crate::{Error, USER_ID_LABEL};

/// Name of the quota object placed in every workspace
pub const QUOTA_NAME: &str = "resource-quotas";

/// Built-in aggregated role granted to the workspace owner
pub const EDIT_ROLE: &str = "edit";

/// Data key holding the bearer token in a service account token secret
pub const TOKEN_KEY: &str = "token";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

fn user_labels(user_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(USER_ID_LABEL.to_string(), user_id.to_string())])
}

/// Workspace namespace labeled with the owner's user id
pub fn namespace(name: &WorkspaceName, user_id: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(user_labels(user_id)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Quota capping the number of pods in the workspace
pub fn resource_quota(namespace: &WorkspaceName, max_pods: u32) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(QUOTA_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(BTreeMap::from([(
                "pods".to_string(),
                Quantity(max_pods.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service account the user authenticates as
pub fn service_account(namespace: &WorkspaceName, name: &str, user_id: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(user_labels(user_id)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Binding of the built-in `edit` cluster role to the service account,
/// scoped to the workspace namespace
pub fn edit_role_binding(
    namespace: &WorkspaceName,
    name: &str,
    service_account: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: EDIT_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Name of the first token secret the cluster attached to an account, if any
pub fn secret_reference(account: &ServiceAccount) -> Option<String> {
    account
        .secrets
        .as_ref()?
        .iter()
        .find_map(|reference| reference.name.clone())
        .filter(|name| !name.is_empty())
}

/// Extract the bearer token from a service account token secret
pub fn secret_token(secret: &Secret) -> Result<String, Error> {
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(TOKEN_KEY))
        .ok_or_else(|| Error::cluster(format!("secret {name} has no {TOKEN_KEY} field")))?;

    let token = String::from_utf8(raw.0.clone())
        .map_err(|_| Error::cluster(format!("secret {name} token is not valid UTF-8")))?;
    if token.is_empty() {
        return Err(Error::cluster(format!("secret {name} token is empty")));
    }
    Ok(token)
}
