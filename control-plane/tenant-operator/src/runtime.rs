use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::{sync::mpsc, task::JoinHandle, try_join};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::OperatorConfig,
    controller::{ControllerContext, run_tenant_controller, run_workspace_controller},
    identity::{IdentityActor, KeycloakActor, NoopIdentity},
    web::{self, EventState, TRIGGER_CAPACITY},
    webhook::{self, AdmissionPolicy, WebhookState, lookup::KubeLookup},
};

const IDENTITY_RETRY: Duration = Duration::from_secs(30);

/// Builds the identity actor. Keycloak is initialized in the background so
/// the controllers start even while it is unreachable.
pub fn build_identity(
    cfg: &OperatorConfig,
    shutdown: CancellationToken,
) -> Arc<dyn IdentityActor> {
    if cfg.keycloak.url.is_none() {
        info!("no identity provider configured, role sync disabled");
        return Arc::new(NoopIdentity);
    }
    let actor = match KeycloakActor::new(&cfg.keycloak) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            warn!(error = %e, "identity provider misconfigured, role sync disabled");
            return Arc::new(NoopIdentity);
        }
    };

    let bg = actor.clone();
    tokio::spawn(async move {
        loop {
            match bg.initialize().await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, retry_in = ?IDENTITY_RETRY, "keycloak initialization failed");
                    bg.reset().await;
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(IDENTITY_RETRY) => {}
            }
        }
    });
    actor
}

pub fn webhook_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.webhook.port).into()
}

pub fn events_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.webhook.events_port).into()
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Starts both controllers and both HTTP servers, returning once all of
/// them stopped after a shutdown signal or when one fails.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let identity = build_identity(&cfg, shutdown.clone());
    let ctx = Arc::new(ControllerContext::new(client.clone(), &cfg, identity)?);
    let concurrency = cfg.max_concurrent_reconciles;
    let drain = Duration::from_secs(cfg.webhook.shutdown_timeout_secs);

    let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);

    let workspaces: JoinHandle<anyhow::Result<()>> = tokio::spawn({
        let (ctx, token) = (ctx.clone(), shutdown.clone());
        async move {
            run_workspace_controller(ctx, concurrency, token).await;
            Ok(())
        }
    });

    let tenants: JoinHandle<anyhow::Result<()>> = tokio::spawn({
        let (ctx, token) = (ctx.clone(), shutdown.clone());
        async move {
            run_tenant_controller(ctx, concurrency, token, rx).await;
            Ok(())
        }
    });

    let admission_app = webhook::router(Arc::new(WebhookState {
        lookup: Arc::new(KubeLookup::new(client)),
        policy: AdmissionPolicy {
            target_label: ctx.target_label.clone(),
            bypass_groups: cfg.webhook.bypass_groups(),
            base_workspaces: ctx.base_workspaces.clone(),
        },
    }));
    let tls = cfg
        .webhook
        .tls_paths()
        .map(|(c, k)| (c.to_string(), k.to_string()));
    let admission: JoinHandle<anyhow::Result<()>> = tokio::spawn({
        let (addr, token) = (webhook_addr(&cfg), shutdown.clone());
        async move {
            let tls = tls.as_ref().map(|(c, k)| (c.as_str(), k.as_str()));
            let res = webhook::serve(addr, admission_app, tls, token.clone(), drain).await;
            if res.is_err() {
                token.cancel();
            }
            res
        }
    });

    let events_app = web::router(Arc::new(EventState { triggers: tx }));
    let events: JoinHandle<anyhow::Result<()>> = tokio::spawn({
        let (addr, token) = (events_addr(&cfg), shutdown.clone());
        async move {
            let res = webhook::serve(addr, events_app, None, token.clone(), drain).await;
            if res.is_err() {
                token.cancel();
            }
            res
        }
    });

    tokio::spawn({
        let token = shutdown.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    let (w, t, a, e) = try_join!(workspaces, tenants, admission, events)?;
    w?;
    t?;
    a?;
    e?;
    info!("operator stopped");
    Ok(())
}
