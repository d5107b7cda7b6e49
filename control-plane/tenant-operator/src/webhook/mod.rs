//! Admission webhook for Tenant objects.
//!
//! The defaulter pins the operator selector label and the base workspaces,
//! the validator decides who may change which workspace memberships.

pub mod defaulter;
pub mod diff;
pub mod error;
pub mod lookup;
pub mod validator;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use chrono::Utc;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::crd::tenant::Tenant;
use crate::label::KvLabel;
pub use error::{AdmissionError, WebhookError};
use lookup::TenantLookup;

pub const VALIDATOR_PATH: &str = "/validator-v1alpha2-tenant";
pub const DEFAULTER_PATH: &str = "/defaulter-v1alpha2-tenant";

/// Static admission settings shared by both hooks.
#[derive(Clone, Debug)]
pub struct AdmissionPolicy {
    pub target_label: KvLabel,
    pub bypass_groups: Vec<String>,
    pub base_workspaces: Vec<String>,
}

impl AdmissionPolicy {
    /// Whether any of the groups may skip the tenant checks.
    pub fn is_bypass(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| self.bypass_groups.contains(g))
    }
}

/// A decoded Tenant admission request.
#[derive(Clone, Debug)]
pub struct TenantAdmission {
    pub operation: Operation,
    pub name: String,
    pub username: String,
    pub groups: Vec<String>,
    pub object: Option<Tenant>,
    pub old_object: Option<Tenant>,
}

fn decode_tenant(obj: Option<&DynamicObject>) -> Result<Option<Tenant>, AdmissionError> {
    obj.map(|o| serde_json::to_value(o).and_then(serde_json::from_value::<Tenant>))
        .transpose()
        .map_err(|e| AdmissionError::BadRequest(format!("expected a Tenant object: {e}")))
}

impl TryFrom<&AdmissionRequest<DynamicObject>> for TenantAdmission {
    type Error = AdmissionError;

    fn try_from(req: &AdmissionRequest<DynamicObject>) -> Result<Self, Self::Error> {
        Ok(Self {
            operation: req.operation.clone(),
            name: req.name.clone(),
            username: req.user_info.username.clone().unwrap_or_default(),
            groups: req.user_info.groups.clone().unwrap_or_default(),
            object: decode_tenant(req.object.as_ref())?,
            old_object: decode_tenant(req.old_object.as_ref())?,
        })
    }
}

pub struct WebhookState {
    pub lookup: Arc<dyn TenantLookup>,
    pub policy: AdmissionPolicy,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATOR_PATH, post(validate_handler))
        .route(DEFAULTER_PATH, post(mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reject(req: &AdmissionRequest<DynamicObject>, err: &AdmissionError) -> AdmissionResponse {
    let mut resp = AdmissionResponse::from(req).deny(err.to_string());
    resp.result.code = err.code();
    resp.result.reason = err.reason().to_string();
    resp
}

fn parse_review(
    body: AdmissionReview<DynamicObject>,
) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match parse_review(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp.into_review()),
    };
    let adm = match TenantAdmission::try_from(&req) {
        Ok(adm) => adm,
        Err(e) => return Json(reject(&req, &e).into_review()),
    };

    let resp = match validator::validate_tenant(&adm, state.lookup.as_ref(), &state.policy, Utc::now())
        .await
    {
        Ok(warnings) => {
            let mut resp = AdmissionResponse::from(&req);
            if !warnings.is_empty() {
                resp.warnings = Some(warnings);
            }
            resp
        }
        Err(e) => {
            warn!(user = %adm.username, tenant = %adm.name, code = e.code(), reason = %e, "tenant write denied");
            reject(&req, &e)
        }
    };
    Json(resp.into_review())
}

/// The submitted object with the fields owned by the defaulter taken from
/// `mutated`; everything else stays as sent.
fn defaulted_document(
    raw: &serde_json::Value,
    original: &Tenant,
    mutated: &Tenant,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut doc = raw.clone();
    if mutated.labels() != original.labels() {
        let labels = serde_json::to_value(mutated.labels())?;
        if let Some(meta) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("labels".into(), labels);
        }
    }
    if mutated.spec.workspaces != original.spec.workspaces {
        let workspaces = serde_json::to_value(&mutated.spec.workspaces)?;
        if let Some(spec) = doc.get_mut("spec").and_then(|s| s.as_object_mut()) {
            spec.insert("workspaces".into(), workspaces);
        }
    }
    Ok(doc)
}

pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let req = match parse_review(body) {
        Ok(req) => req,
        Err(resp) => return Ok(Json(resp.into_review())),
    };
    let adm = match TenantAdmission::try_from(&req) {
        Ok(adm) => adm,
        Err(e) => return Ok(Json(reject(&req, &e).into_review())),
    };
    let (Some(original), Some(submitted)) = (adm.object.as_ref(), req.object.as_ref()) else {
        return Ok(Json(AdmissionResponse::from(&req).into_review()));
    };

    let resp = match defaulter::default_tenant(&adm, &state.policy) {
        Ok(mutated) => {
            // patch against the raw object so absent fields get whole-value adds
            let raw = serde_json::to_value(submitted)?;
            let patch = json_patch::diff(&raw, &defaulted_document(&raw, original, &mutated)?);
            if patch.0.is_empty() {
                AdmissionResponse::from(&req)
            } else {
                info!(tenant = %adm.name, ops = patch.0.len(), "tenant defaulted");
                AdmissionResponse::from(&req).with_patch(patch)?
            }
        }
        Err(e) => reject(&req, &e),
    };
    Ok(Json(resp.into_review()))
}

/// Serves `app` until `shutdown` fires, then drains for at most `drain`.
/// TLS is used when a certificate and key are given.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: Option<(&str, &str)>,
    shutdown: CancellationToken,
    drain: Duration,
) -> anyhow::Result<()> {
    let handle = Handle::new();
    let on_shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        on_shutdown.graceful_shutdown(Some(drain));
    });

    match tls {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key).await?;
            info!(%addr, "listening with TLS");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!(%addr, "no certificate configured, listening on plain HTTP");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }
    info!(%addr, "server stopped");
    Ok(())
}
