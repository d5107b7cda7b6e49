use std::collections::BTreeMap;

use kube::{
    Api, ResourceExt,
    api::{ListParams, Patch, PatchParams},
};
use serde_json::json;
use tracing::{debug, info};

use super::{ControllerContext, ReconcileErr};
use crate::crd::tenant::{Tenant, TenantWorkspaceEntry, WorkspaceRole, remove_workspace_entry};
use crate::crd::workspace::{AutoEnroll, Workspace};
use crate::crd::{AUTOENROLL_LABEL, workspace_label_key};

/// Label value when it differs from the current one, `None` when up to date.
pub fn wanted_label(
    policy: AutoEnroll,
    labels: &BTreeMap<String, String>,
) -> Option<&'static str> {
    let wanted = policy.label_value();
    match labels.get(AUTOENROLL_LABEL) {
        Some(current) if current == wanted => None,
        _ => Some(wanted),
    }
}

/// New membership list of a candidate tenant under `policy`.
///
/// `None` means the list must not be touched: candidates keep waiting for
/// approval. Otherwise the candidate entry is dropped and, for immediate
/// enrollment, replaced by a user entry.
pub fn resolve_candidate(
    workspaces: &[TenantWorkspaceEntry],
    workspace: &str,
    policy: AutoEnroll,
) -> Option<Vec<TenantWorkspaceEntry>> {
    if policy == AutoEnroll::WithApproval {
        return None;
    }
    let mut updated = workspaces.to_vec();
    remove_workspace_entry(&mut updated, workspace);
    if policy == AutoEnroll::Immediate {
        updated.push(TenantWorkspaceEntry::new(workspace, WorkspaceRole::User));
    }
    Some(updated)
}

/// Converges the autoenroll label and the pending candidates of `ws`.
pub async fn enforce_autoenroll(
    ws: &Workspace,
    ctx: &ControllerContext,
) -> Result<(), ReconcileErr> {
    let name = ws.name_any();
    let policy = ws.spec.auto_enroll;

    if let Some(value) = wanted_label(policy, ws.labels()) {
        let api: Api<Workspace> = Api::all(ctx.client.clone());
        let patch = json!({"metadata": {"labels": {AUTOENROLL_LABEL: value}}});
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(workspace = %name, autoenroll = value, "autoenroll label updated");
    }

    if policy == AutoEnroll::WithApproval {
        return Ok(());
    }

    let tenants: Api<Tenant> = Api::all(ctx.client.clone());
    let selector = format!(
        "{}={}",
        workspace_label_key(&name),
        WorkspaceRole::Candidate
    );
    let candidates = tenants.list(&ListParams::default().labels(&selector)).await?;
    debug!(workspace = %name, count = candidates.items.len(), "resolving candidates");

    for tn in candidates {
        let Some(updated) = resolve_candidate(&tn.spec.workspaces, &name, policy) else {
            continue;
        };
        let patch = json!({
            "metadata": {"resourceVersion": tn.resource_version()},
            "spec": {"workspaces": updated},
        });
        tenants
            .patch(&tn.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(
            workspace = %name,
            tenant = %tn.name_any(),
            policy = policy.label_value(),
            "candidate resolved"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[(&str, WorkspaceRole)]) -> Vec<TenantWorkspaceEntry> {
        list.iter()
            .map(|(n, r)| TenantWorkspaceEntry::new(*n, *r))
            .collect()
    }

    #[test]
    fn label_follows_policy() {
        let mut labels = BTreeMap::new();
        assert_eq!(wanted_label(AutoEnroll::Disabled, &labels), Some("disabled"));
        labels.insert(AUTOENROLL_LABEL.to_string(), "disabled".to_string());
        assert_eq!(wanted_label(AutoEnroll::Disabled, &labels), None);
        assert_eq!(
            wanted_label(AutoEnroll::Immediate, &labels),
            Some("immediate")
        );
    }

    #[test]
    fn with_approval_keeps_candidates() {
        let wss = entries(&[("w", WorkspaceRole::Candidate)]);
        assert!(resolve_candidate(&wss, "w", AutoEnroll::WithApproval).is_none());
    }

    #[test]
    fn immediate_promotes_candidate_to_user() {
        let wss = entries(&[
            ("base", WorkspaceRole::User),
            ("w", WorkspaceRole::Candidate),
        ]);
        let out = resolve_candidate(&wss, "w", AutoEnroll::Immediate).unwrap();
        assert_eq!(
            out,
            entries(&[("base", WorkspaceRole::User), ("w", WorkspaceRole::User)])
        );
    }

    #[test]
    fn disabled_drops_candidate() {
        let wss = entries(&[
            ("w", WorkspaceRole::Candidate),
            ("other", WorkspaceRole::Manager),
        ]);
        let out = resolve_candidate(&wss, "w", AutoEnroll::Disabled).unwrap();
        assert_eq!(out, entries(&[("other", WorkspaceRole::Manager)]));
    }
}
