pub mod tenant;
pub mod workspace;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "crownlabs.polito.it";

/// Finalizer placed on every Tenant and Workspace this operator manages.
pub const FINALIZER: &str = "crownlabs.polito.it/tenant-operator";

/// Prefix of the per-workspace membership label set on tenants.
pub const WORKSPACE_LABEL_PREFIX: &str = "crownlabs.polito.it/workspace-";
pub const AUTOENROLL_LABEL: &str = "crownlabs.polito.it/autoenroll";
pub const MANAGED_BY_LABEL: &str = "crownlabs.polito.it/managed-by";
pub const TYPE_LABEL: &str = "crownlabs.polito.it/type";
pub const NO_WORKSPACES_LABEL: &str = "crownlabs.polito.it/no-workspaces";
pub const NO_WORKSPACES_VALUE: &str = "true";

/// Tenant used by platform services; never carries the operator selector.
pub const SVC_TENANT_NAME: &str = "service-tenant";

/// Key of the identity provider entry in subscription maps.
pub const KEYCLOAK_SUBSCRIPTION: &str = "keycloak";

/// `crownlabs.polito.it/workspace-<ws>`
pub fn workspace_label_key(workspace: &str) -> String {
    format!("{WORKSPACE_LABEL_PREFIX}{workspace}")
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ResourceQuota {
    /// Maximum CPU cores, as a quantity (e.g. "4" or "2500m")
    pub cpu: Quantity,
    /// Maximum memory, as a quantity (e.g. "8Gi")
    pub memory: Quantity,
    /// Maximum number of concurrently running instances
    pub instances: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
pub struct NameCreated {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Ok,
    Pending,
    Failed,
}
