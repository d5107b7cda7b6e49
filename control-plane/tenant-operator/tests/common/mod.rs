#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Client,
    api::{Api, Patch, PatchParams},
};
use tenant_operator::config::OperatorConfig;
use tenant_operator::controller::ControllerContext;
use tenant_operator::controller::forge::namespace_name;
use tenant_operator::crd::tenant::Tenant;
use tenant_operator::crd::workspace::Workspace;
use tenant_operator::identity::NoopIdentity;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub const TEST_SELECTOR_KEY: &str = "crownlabs.polito.it/operator-selector";

// Env guard utilities
pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

/// Operator config owning objects labelled `<selector>=<instance>`, with a
/// short recheck so tests see periodic reconciles.
pub fn test_config(instance: &str) -> OperatorConfig {
    let env = HashMap::from([
        (
            "CL_OP_TARGET_LABEL".to_string(),
            format!("{TEST_SELECTOR_KEY}={instance}"),
        ),
        ("CL_OP_REQUEUE_MIN_SECS".to_string(), "5".to_string()),
        ("CL_OP_REQUEUE_MAX_SECS".to_string(), "10".to_string()),
        ("CL_OP_MAX_CONCURRENT_RECONCILES".to_string(), "2".to_string()),
    ]);
    OperatorConfig::init_from_hashmap(&env).expect("test config")
}

pub fn test_context(client: Client, cfg: &OperatorConfig) -> Arc<ControllerContext> {
    Arc::new(ControllerContext::new(client, cfg, Arc::new(NoopIdentity)).expect("context"))
}

/// Polls `check` once a second until it yields a value.
pub async fn wait_for<T, F, Fut>(what: &str, secs: u64, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..secs {
        if let Some(v) = check().await {
            return v;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("{what} not observed within {secs}s");
}

/// Best-effort removal; finalizers are dropped since the controllers are gone.
pub async fn cleanup(client: Client, workspaces: Vec<String>, tenants: Vec<String>) {
    let ws_api: Api<Workspace> = Api::all(client.clone());
    let tn_api: Api<Tenant> = Api::all(client.clone());
    let ns_api: Api<Namespace> = Api::all(client);
    let strip = serde_json::json!({"metadata": {"finalizers": null}});
    for name in tenants {
        let _ = tn_api.delete(&name, &Default::default()).await;
        let _ = tn_api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&strip))
            .await;
    }
    for name in workspaces {
        let _ = ws_api.delete(&name, &Default::default()).await;
        let _ = ws_api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&strip))
            .await;
        let _ = ns_api
            .delete(&namespace_name(&name), &Default::default())
            .await;
    }
}

// RAII guard stopping the controllers and deleting test objects
pub struct ControllerGuard {
    client: Client,
    token: CancellationToken,
    ctrls: Vec<JoinHandle<()>>,
    workspaces: Vec<String>,
    tenants: Vec<String>,
}

impl ControllerGuard {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            token: CancellationToken::new(),
            ctrls: Vec::new(),
            workspaces: Vec::new(),
            tenants: Vec::new(),
        }
    }
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
    pub fn with_controller(mut self, ctrl: JoinHandle<()>) -> Self {
        self.ctrls.push(ctrl);
        self
    }
    pub fn track_workspace(mut self, name: &str) -> Self {
        self.workspaces.push(name.to_string());
        self
    }
    pub fn track_tenant(mut self, name: &str) -> Self {
        self.tenants.push(name.to_string());
        self
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        self.token.cancel();
        for handle in &self.ctrls {
            handle.abort();
        }
        let client = self.client.clone();
        let workspaces = std::mem::take(&mut self.workspaces);
        let tenants = std::mem::take(&mut self.tenants);
        let _ = tokio::spawn(async move {
            cleanup(client, workspaces, tenants).await;
        });
    }
}
