use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use kube::ResourceExt;
use kube::core::admission::Operation;
use tracing::{debug, info};

use super::diff::calculate_workspaces_diff;
use super::lookup::TenantLookup;
use super::{AdmissionError, AdmissionPolicy, TenantAdmission};
use crate::crd::tenant::{Tenant, TenantSpec, TenantWorkspaceEntry, WorkspaceRole};
use crate::crd::workspace::AutoEnroll;

/// Maximum skew accepted on a self-reported `lastLogin`, hours.
pub const LAST_LOGIN_TOLERANCE_HOURS: i64 = 24;

pub const OVERRIDE_WARNING: &str = "webhook check overridden";

/// Decides whether a Tenant write is allowed, returning the warnings to
/// attach to an accepted request.
pub async fn validate_tenant(
    adm: &TenantAdmission,
    lookup: &dyn TenantLookup,
    policy: &AdmissionPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<String>, AdmissionError> {
    if adm.operation == Operation::Delete {
        return Ok(vec![]);
    }
    let new = adm
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::BadRequest("expected a Tenant object".into()))?;

    if policy.is_bypass(&adm.groups) {
        info!(user = %adm.username, tenant = %adm.name, "admission checks bypassed");
        return Ok(vec![OVERRIDE_WARNING.to_string()]);
    }

    match adm.operation {
        Operation::Create => manager_edit(adm, new, None, lookup).await,
        Operation::Update => {
            let old = adm.old_object.as_ref().ok_or_else(|| {
                AdmissionError::BadRequest("missing previous Tenant object".into())
            })?;
            if adm.username == new.name_any() {
                self_edit(new, old, lookup, now).await
            } else {
                manager_edit(adm, new, Some(old), lookup).await
            }
        }
        _ => Ok(vec![]),
    }
}

async fn self_edit(
    new: &Tenant,
    old: &Tenant,
    lookup: &dyn TenantLookup,
    now: DateTime<Utc>,
) -> Result<Vec<String>, AdmissionError> {
    let name = new.name_any();
    if new.spec.last_login != old.spec.last_login {
        let fresh = new
            .spec
            .last_login
            .is_some_and(|ll| (now - ll).abs() <= TimeDelta::hours(LAST_LOGIN_TOLERANCE_HOURS));
        if !fresh {
            return Err(AdmissionError::Forbidden(format!(
                "invalid lastLogin for tenant {name}: more than {LAST_LOGIN_TOLERANCE_HOURS}h from now"
            )));
        }
    }

    let masked = TenantSpec {
        public_keys: old.spec.public_keys.clone(),
        last_login: old.spec.last_login,
        workspaces: old.spec.workspaces.clone(),
        ..new.spec.clone()
    };
    if masked != old.spec {
        return Err(AdmissionError::Forbidden(
            "only lastLogin, publicKeys and self-enrolling workspaces are allowed to change"
                .into(),
        ));
    }

    check_self_enrollment(&new.spec.workspaces, &old.spec.workspaces, lookup).await?;
    debug!(tenant = %name, "self edit accepted");
    Ok(vec![])
}

async fn check_self_enrollment(
    new: &[TenantWorkspaceEntry],
    old: &[TenantWorkspaceEntry],
    lookup: &dyn TenantLookup,
) -> Result<(), AdmissionError> {
    let requested: BTreeMap<&str, WorkspaceRole> =
        new.iter().map(|e| (e.name.as_str(), e.role)).collect();

    for ws in calculate_workspaces_diff(new, old).keys() {
        let policy = lookup
            .get_workspace(ws)
            .await
            .map_err(|e| AdmissionError::Internal(format!("failed to get workspace {ws}: {e}")))?
            .map(|w| w.spec.auto_enroll);
        let role = requested.get(ws.as_str()).copied();

        match (policy, role) {
            // leaving a workspace that no longer exists
            (None, None) => {}
            (None, Some(_)) => {
                return Err(AdmissionError::Forbidden(format!(
                    "workspace {ws} does not exist"
                )));
            }
            (Some(AutoEnroll::Disabled), _) => {
                return Err(AdmissionError::Forbidden(format!(
                    "workspace {ws} does not allow self-enrollment"
                )));
            }
            (Some(_), None) => {}
            (Some(AutoEnroll::Immediate), Some(r)) if r != WorkspaceRole::User => {
                return Err(AdmissionError::Forbidden(format!(
                    "workspace {ws} only allows enrolling as user"
                )));
            }
            (Some(AutoEnroll::WithApproval), Some(r)) if r != WorkspaceRole::Candidate => {
                return Err(AdmissionError::Forbidden(format!(
                    "workspace {ws} only allows enrolling as candidate"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

async fn manager_edit(
    adm: &TenantAdmission,
    new: &Tenant,
    old: Option<&Tenant>,
    lookup: &dyn TenantLookup,
) -> Result<Vec<String>, AdmissionError> {
    let manager = lookup
        .get_tenant(&adm.username)
        .await
        .map_err(|e| {
            AdmissionError::Internal(format!("failed to get tenant {}: {e}", adm.username))
        })?
        .ok_or_else(|| AdmissionError::NotFound(format!("tenant {} not found", adm.username)))?;

    let managed: Vec<&str> = manager
        .spec
        .workspaces
        .iter()
        .filter(|e| e.role == WorkspaceRole::Manager)
        .map(|e| e.name.as_str())
        .collect();

    let old_workspaces = old.map(|o| o.spec.workspaces.as_slice()).unwrap_or(&[]);
    for ws in calculate_workspaces_diff(&new.spec.workspaces, old_workspaces).keys() {
        if !managed.contains(&ws.as_str()) {
            return Err(AdmissionError::Forbidden(format!(
                "you are not a manager for workspace {ws}"
            )));
        }
    }

    if let Some(old) = old {
        let masked = TenantSpec {
            workspaces: old.spec.workspaces.clone(),
            ..new.spec.clone()
        };
        if masked != old.spec {
            return Err(AdmissionError::Forbidden(
                "only workspaces are allowed to change".into(),
            ));
        }
    }

    debug!(manager = %adm.username, tenant = %adm.name, "workspace edit accepted");
    Ok(vec![])
}
