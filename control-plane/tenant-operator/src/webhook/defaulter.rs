use kube::ResourceExt;
use kube::core::admission::Operation;
use tracing::info;

use super::{AdmissionError, AdmissionPolicy, TenantAdmission};
use crate::crd::SVC_TENANT_NAME;
use crate::crd::tenant::{Tenant, TenantWorkspaceEntry, WorkspaceRole};

/// Returns the tenant as it should be persisted.
///
/// The operator selector label can only be set by the webhook itself (or
/// kept by a bypass actor), and every base workspace is present.
pub fn default_tenant(
    adm: &TenantAdmission,
    policy: &AdmissionPolicy,
) -> Result<Tenant, AdmissionError> {
    let mut tn = adm
        .object
        .clone()
        .ok_or_else(|| AdmissionError::BadRequest("expected a Tenant object".into()))?;
    enforce_selector_label(&mut tn, adm, policy)?;
    enforce_base_workspaces(&mut tn, &policy.base_workspaces);
    Ok(tn)
}

fn enforce_selector_label(
    tn: &mut Tenant,
    adm: &TenantAdmission,
    policy: &AdmissionPolicy,
) -> Result<(), AdmissionError> {
    let key = policy.target_label.key().to_string();

    if adm.name == SVC_TENANT_NAME {
        if !policy.target_label.is_included(tn.labels()) {
            tn.labels_mut().insert(key, String::new());
            info!(tenant = %adm.name, "selector label cleared on service tenant");
        }
        return Ok(());
    }

    let requested = tn.labels().get(&key).cloned().unwrap_or_default();
    if !requested.is_empty() && policy.is_bypass(&adm.groups) {
        info!(tenant = %adm.name, "webhook override: labels untouched");
        return Ok(());
    }

    if adm.operation == Operation::Create {
        tn.labels_mut()
            .insert(key, policy.target_label.value().to_string());
        return Ok(());
    }

    let old = adm
        .old_object
        .as_ref()
        .ok_or_else(|| AdmissionError::BadRequest("missing previous Tenant object".into()))?;
    match old.labels().get(&key) {
        Some(prev) if *prev != requested => {
            info!(tenant = %adm.name, %requested, applied = %prev, "selector label change prevented");
            tn.labels_mut().insert(key, prev.clone());
        }
        None if !requested.is_empty() => {
            info!(tenant = %adm.name, %requested, "selector label addition prevented");
            tn.labels_mut().remove(&key);
        }
        _ => {}
    }
    Ok(())
}

fn enforce_base_workspaces(tn: &mut Tenant, base: &[String]) {
    for ws in base {
        if !tn.spec.workspaces.iter().any(|e| e.name == *ws) {
            tn.spec
                .workspaces
                .push(TenantWorkspaceEntry::new(ws.clone(), WorkspaceRole::User));
            info!(tenant = %tn.name_any(), workspace = %ws, "base workspace added");
        }
    }
}
