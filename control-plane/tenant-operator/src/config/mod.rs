mod types;

pub use types::{
    KeycloakConfig, OperatorConfig, QuotaConfig, RescheduleConfig,
    WebhookConfig, split_list,
};
