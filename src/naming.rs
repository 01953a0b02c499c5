//! Identity to resource-name derivations
//!
//! Every name the provisioner uses is a pure function of the requester's
//! identity, so a later run for the same person finds (and cleans up) the
//! resources an earlier run created.

use std::fmt;

use crate::USER_ID_LABEL;

/// Suffix appended to every workspace namespace
pub const WORKSPACE_SUFFIX: &str = "-workspace";

/// Suffix appended to the service account name to form the role binding name
pub const ROLE_BINDING_SUFFIX: &str = "-edit-binding";

/// Kubernetes limit for DNS-1123 label names (namespaces)
const MAX_LABEL_LEN: usize = 63;

/// Kubernetes limit for DNS-1123 subdomain names (service accounts, bindings)
const MAX_SUBDOMAIN_LEN: usize = 253;

/// Namespace name derived from a user's display name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Derive the workspace name for a display name
    pub fn for_display_name(display_name: &str) -> Self {
        let budget = MAX_LABEL_LEN - WORKSPACE_SUFFIX.len();
        let mut base = normalize_separators(display_name);
        if base.len() > budget {
            base.truncate(budget);
            // ASCII-only after normalization, so byte truncation is safe
            base.truncate(base.trim_end_matches('-').len());
        }
        if base.is_empty() {
            base.push_str("user");
        }
        Self(format!("{base}{WORKSPACE_SUFFIX}"))
    }

    /// The namespace name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the workspace (namespace) name for a display name
///
/// `"jane.doe"` becomes `"jane-doe-workspace"`.
pub fn workspace_name(display_name: &str) -> WorkspaceName {
    WorkspaceName::for_display_name(display_name)
}

/// Derive the service account name for a display name
///
/// Keeps the display name recognisable (`"jane.doe"` stays `"jane.doe"`)
/// while producing a valid DNS-1123 subdomain: anything else becomes `-`,
/// and every dot-separated segment is trimmed to start and end alphanumeric.
pub fn service_account_name(display_name: &str) -> String {
    let replaced: String = display_name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut name = replaced
        .split('.')
        .map(|segment| segment.trim_matches('-'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".");

    // ASCII-only, so byte truncation is safe
    name.truncate(MAX_SUBDOMAIN_LEN - ROLE_BINDING_SUFFIX.len());
    name.truncate(name.trim_end_matches(['.', '-']).len());

    if name.is_empty() {
        name.push_str("user");
    }
    name
}

/// Name of the role binding granting edit rights to a service account
pub fn role_binding_name(service_account: &str) -> String {
    format!("{service_account}{ROLE_BINDING_SUFFIX}")
}

/// Label selector matching every object labeled with the given user id
pub fn user_selector(user_id: &str) -> String {
    format!("{USER_ID_LABEL}={user_id}")
}

/// Whether a user id can be used verbatim as a label value
pub fn is_valid_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Lowercase, map every non-alphanumeric run to a single `-`, trim the ends
fn normalize_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}
