use std::fmt;

use envconfig::Envconfig;
use tokio::time::Duration;

use crate::label::{KvLabel, LabelError};
use crate::quota::QuotaCaps;
use crate::reschedule::Rescheduler;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Selector of the objects this instance owns, as key=value
    /// Env: CL_OP_TARGET_LABEL
    #[envconfig(
        from = "CL_OP_TARGET_LABEL",
        default = "crownlabs.polito.it/operator-selector=production"
    )]
    pub target_label: String,

    /// Comma-separated workspaces every tenant is enrolled in as user
    #[envconfig(from = "CL_OP_BASE_WORKSPACES", default = "")]
    pub base_workspaces: String,

    #[envconfig(from = "CL_OP_MAX_CONCURRENT_RECONCILES", default = "1")]
    pub max_concurrent_reconciles: u16,

    /// Field manager name used for server-side apply
    #[envconfig(from = "CL_OP_FIELD_MANAGER", default = "tenant-operator")]
    pub field_manager: String,

    #[envconfig(nested)]
    pub reschedule: RescheduleConfig,

    #[envconfig(nested)]
    pub quota: QuotaConfig,

    #[envconfig(nested)]
    pub webhook: WebhookConfig,

    #[envconfig(nested)]
    pub keycloak: KeycloakConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RescheduleConfig {
    /// Lower bound of the periodic recheck, seconds (0 = unset)
    #[envconfig(from = "CL_OP_REQUEUE_MIN_SECS", default = "86400")]
    pub min_secs: u64,
    /// Upper bound of the periodic recheck, seconds (0 = unset)
    #[envconfig(from = "CL_OP_REQUEUE_MAX_SECS", default = "604800")]
    pub max_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct QuotaConfig {
    #[envconfig(from = "CL_OP_CAP_INSTANCE", default = "10")]
    pub cap_instance: u32,
    #[envconfig(from = "CL_OP_CAP_CPU", default = "25")]
    pub cap_cpu: u32,
    #[envconfig(from = "CL_OP_CAP_MEMORY_GIGA", default = "50")]
    pub cap_memory_giga: u32,
}

#[derive(Envconfig, Clone, Debug)]
pub struct WebhookConfig {
    /// Port of the admission webhook server
    #[envconfig(from = "CL_OP_WEBHOOK_PORT", default = "9443")]
    pub port: u16,
    /// PEM certificate; the server falls back to plain HTTP when unset
    #[envconfig(from = "CL_OP_WEBHOOK_CERT_PATH")]
    pub cert_path: Option<String>,
    #[envconfig(from = "CL_OP_WEBHOOK_KEY_PATH")]
    pub key_path: Option<String>,
    /// Comma-separated groups allowed to skip tenant admission checks
    #[envconfig(from = "CL_OP_WEBHOOK_BYPASS_GROUPS", default = "system:masters")]
    pub bypass_groups: String,
    /// Port of the identity provider event webhook
    #[envconfig(from = "CL_OP_EVENTS_PORT", default = "8082")]
    pub events_port: u16,
    /// Seconds in-flight requests get to drain on shutdown
    #[envconfig(from = "CL_OP_SHUTDOWN_TIMEOUT_SECS", default = "10")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Envconfig, Clone)]
pub struct KeycloakConfig {
    /// Base URL of Keycloak; identity sync is disabled when unset
    #[envconfig(from = "CL_OP_KEYCLOAK_URL")]
    pub url: Option<String>,
    #[envconfig(from = "CL_OP_KEYCLOAK_REALM", default = "crownlabs")]
    pub realm: String,
    #[envconfig(from = "CL_OP_KEYCLOAK_CLIENT_ID")]
    pub client_id: Option<String>,
    #[envconfig(from = "CL_OP_KEYCLOAK_CLIENT_SECRET")]
    pub client_secret: Option<String>,
    /// Client owning the workspace roles; defaults to the client id
    #[envconfig(from = "CL_OP_KEYCLOAK_ROLES_CLIENT_ID")]
    pub roles_client_id: Option<String>,
    #[envconfig(from = "CL_OP_KEYCLOAK_TIMEOUT_SECS", default = "10")]
    pub request_timeout_secs: u64,
}

impl fmt::Debug for KeycloakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakConfig")
            .field("url", &self.url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("roles_client_id", &self.roles_client_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl OperatorConfig {
    pub fn target_label(&self) -> Result<KvLabel, LabelError> {
        KvLabel::parse(&self.target_label)
    }

    pub fn base_workspaces(&self) -> Vec<String> {
        split_list(&self.base_workspaces)
    }

    pub fn rescheduler(&self) -> Rescheduler {
        Rescheduler::new(
            Duration::from_secs(self.reschedule.min_secs),
            Duration::from_secs(self.reschedule.max_secs),
        )
    }

    pub fn quota_caps(&self) -> QuotaCaps {
        QuotaCaps {
            cpu: self.quota.cap_cpu,
            memory_giga: self.quota.cap_memory_giga,
            instances: self.quota.cap_instance,
        }
    }
}

impl WebhookConfig {
    pub fn bypass_groups(&self) -> Vec<String> {
        split_list(&self.bypass_groups)
    }

    /// Certificate and key paths when both are configured.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (self.cert_path.as_deref(), self.key_path.as_deref()) {
            (Some(c), Some(k)) if !c.is_empty() && !k.is_empty() => Some((c, k)),
            _ => None,
        }
    }
}
