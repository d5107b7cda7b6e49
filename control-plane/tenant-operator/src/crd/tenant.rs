use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{NameCreated, ResourceQuota, SubscriptionStatus};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "crownlabs.polito.it",
    version = "v1alpha2",
    kind = "Tenant",
    plural = "tenants",
    shortname = "tn",
    status = "TenantStatus",
    printcolumn = r#"{"name":"First Name","type":"string","jsonPath":".spec.firstName"}"#,
    printcolumn = r#"{"name":"Last Name","type":"string","jsonPath":".spec.lastName"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    /// Last time the tenant logged into the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    /// Workspace memberships; at most one entry per workspace name
    #[serde(default)]
    pub workspaces: Vec<TenantWorkspaceEntry>,
    /// SSH public keys
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default)]
    pub create_sandbox: bool,
    #[serde(default)]
    pub create_personal_workspace: bool,
    /// Overrides the quota aggregated from the enrolled workspaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<ResourceQuota>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct TenantWorkspaceEntry {
    pub name: String,
    pub role: WorkspaceRole,
}

impl TenantWorkspaceEntry {
    pub fn new(name: impl Into<String>, role: WorkspaceRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Manager,
    User,
    /// Pending approval; grants no access
    Candidate,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Manager => "manager",
            WorkspaceRole::User => "user",
            WorkspaceRole::Candidate => "candidate",
        }
    }
}

impl fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    #[serde(default)]
    pub personal_namespace: NameCreated,
    #[serde(default)]
    pub sandbox_namespace: NameCreated,
    /// Workspaces the tenant references but cannot be enrolled in
    #[serde(default)]
    pub failing_workspaces: Vec<String>,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<ResourceQuota>,
    #[serde(default)]
    pub ready: bool,
}

/// Removes the first membership entry for `workspace`, preserving order.
/// Returns whether an entry was removed.
pub fn remove_workspace_entry(
    workspaces: &mut Vec<TenantWorkspaceEntry>,
    workspace: &str,
) -> bool {
    match workspaces.iter().position(|w| w.name == workspace) {
        Some(idx) => {
            workspaces.remove(idx);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let e = TenantWorkspaceEntry::new("ws1", WorkspaceRole::Candidate);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v, serde_json::json!({"name": "ws1", "role": "candidate"}));
    }

    #[test]
    fn remove_entry_keeps_order() {
        let mut wss = vec![
            TenantWorkspaceEntry::new("a", WorkspaceRole::User),
            TenantWorkspaceEntry::new("b", WorkspaceRole::Manager),
            TenantWorkspaceEntry::new("c", WorkspaceRole::User),
        ];
        assert!(remove_workspace_entry(&mut wss, "b"));
        let names: Vec<_> = wss.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(!remove_workspace_entry(&mut wss, "b"));
    }

    #[test]
    fn spec_parses_camel_case() {
        let spec: TenantSpec = serde_json::from_value(serde_json::json!({
            "firstName": "Mario",
            "lastName": "Rossi",
            "email": "mario@example.com",
            "lastLogin": "2024-05-01T10:00:00Z",
            "workspaces": [{"name": "netlab", "role": "user"}],
            "publicKeys": ["ssh-ed25519 AAAA"],
        }))
        .unwrap();
        assert_eq!(spec.workspaces.len(), 1);
        assert!(spec.last_login.is_some());
        assert!(!spec.create_sandbox);
    }
}
