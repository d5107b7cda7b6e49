use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{NameCreated, ResourceQuota, SubscriptionStatus};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "crownlabs.polito.it",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "ws",
    status = "WorkspaceStatus",
    printcolumn = r#"{"name":"Pretty Name","type":"string","jsonPath":".spec.prettyName"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Human readable name shown in dashboards and identity roles
    pub pretty_name: String,
    /// Enrollment policy for tenants joining on their own
    #[serde(default)]
    pub auto_enroll: AutoEnroll,
    #[serde(default)]
    pub quota: ResourceQuota,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum AutoEnroll {
    #[default]
    #[serde(rename = "")]
    Disabled,
    #[serde(rename = "withApproval")]
    WithApproval,
    #[serde(rename = "immediate")]
    Immediate,
}

impl AutoEnroll {
    /// Value of the autoenroll label exposed on the workspace.
    pub fn label_value(&self) -> &'static str {
        match self {
            AutoEnroll::Disabled => "disabled",
            AutoEnroll::WithApproval => "withApproval",
            AutoEnroll::Immediate => "immediate",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(default)]
    pub namespace: NameCreated,
    #[serde(default, rename = "subscription")]
    pub subscriptions: BTreeMap<String, SubscriptionStatus>,
    #[serde(default)]
    pub ready: bool,
}
