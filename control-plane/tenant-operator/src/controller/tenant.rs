use std::collections::BTreeMap;
use std::sync::Arc;

use kube::{
    Api, Resource, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::events::REASON_WORKSPACE_FAILING;
use super::{
    ControllerContext, ReconcileErr, add_finalizer, failure_key, has_finalizer, labels_patch,
    remove_finalizer,
};
use crate::crd::tenant::{Tenant, TenantStatus, TenantWorkspaceEntry, WorkspaceRole};
use crate::crd::workspace::{AutoEnroll, Workspace};
use crate::crd::{
    NO_WORKSPACES_LABEL, NO_WORKSPACES_VALUE, ResourceQuota, WORKSPACE_LABEL_PREFIX,
    workspace_label_key,
};
use crate::quota::tenant_quota;

#[derive(Debug, PartialEq, Eq)]
pub struct WorkspaceSync {
    pub labels: BTreeMap<String, String>,
    pub failing: Vec<String>,
}

/// Rebuilds the membership labels of a tenant.
///
/// `found` maps the existing workspaces referenced by the tenant to their
/// enrollment policy. Missing workspaces, and candidates of workspaces not
/// accepting approvals, are reported as failing and get no label.
pub fn sync_workspace_labels(
    current: &BTreeMap<String, String>,
    entries: &[TenantWorkspaceEntry],
    found: &BTreeMap<String, AutoEnroll>,
    base_workspaces: &[String],
) -> WorkspaceSync {
    let mut labels: BTreeMap<String, String> = current
        .iter()
        .filter(|(k, _)| !k.starts_with(WORKSPACE_LABEL_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut failing = Vec::new();
    let mut non_base = 0usize;

    for entry in entries {
        match found.get(&entry.name) {
            None => failing.push(entry.name.clone()),
            Some(policy)
                if entry.role == WorkspaceRole::Candidate
                    && *policy != AutoEnroll::WithApproval =>
            {
                failing.push(entry.name.clone())
            }
            Some(_) => {
                labels.insert(workspace_label_key(&entry.name), entry.role.to_string());
                if !base_workspaces.contains(&entry.name) {
                    non_base += 1;
                }
            }
        }
    }

    if non_base == 0 {
        labels.insert(NO_WORKSPACES_LABEL.to_string(), NO_WORKSPACES_VALUE.to_string());
    } else {
        labels.remove(NO_WORKSPACES_LABEL);
    }

    WorkspaceSync { labels, failing }
}

/// Workspaces whose quota counts for the tenant: no candidates, no failing ones.
pub fn enrolled_workspaces<'a>(
    entries: &'a [TenantWorkspaceEntry],
    failing: &'a [String],
) -> impl Iterator<Item = &'a TenantWorkspaceEntry> {
    entries
        .iter()
        .filter(|e| e.role != WorkspaceRole::Candidate && !failing.contains(&e.name))
}

#[instrument(skip_all, fields(tenant = %obj.name_any()))]
pub async fn reconcile_tenant(
    obj: Arc<Tenant>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let name = obj.name_any();
    let api: Api<Tenant> = Api::all(ctx.client.clone());

    let Some(tn) = api.get_opt(&name).await? else {
        info!(tenant = %name, "reconcile: tenant gone");
        return Ok(Action::await_change());
    };

    if !ctx.target_label.is_included(tn.labels()) {
        info!(tenant = %name, "reconcile: not owned by this instance, skipping");
        return Ok(Action::await_change());
    }

    if tn.meta().deletion_timestamp.is_some() {
        if has_finalizer(tn.meta()) {
            remove_finalizer(&api, tn.meta()).await?;
            info!(tenant = %name, "reconcile: finalizer removed");
        }
        ctx.failures.clear(&failure_key::<Tenant>(&name));
        return Ok(Action::await_change());
    }

    if !has_finalizer(tn.meta()) {
        add_finalizer(&api, tn.meta()).await?;
        info!(tenant = %name, "reconcile: finalizer added");
    }

    let original = tn.status.clone().unwrap_or_default();
    let mut status = original.clone();
    let result = converge_tenant(&tn, &ctx, &mut status).await;
    if original != status {
        patch_status(&api, &name, &status).await;
    }
    result?;

    ctx.failures.clear(&failure_key::<Tenant>(&name));
    Ok(ctx.reschedule.action())
}

async fn converge_tenant(
    tn: &Tenant,
    ctx: &ControllerContext,
    status: &mut TenantStatus,
) -> Result<(), ReconcileErr> {
    let name = tn.name_any();
    status.ready = false;

    let workspaces: Api<Workspace> = Api::all(ctx.client.clone());
    let mut found: BTreeMap<String, Workspace> = BTreeMap::new();
    for entry in &tn.spec.workspaces {
        if let Some(ws) = workspaces.get_opt(&entry.name).await? {
            found.insert(entry.name.clone(), ws);
        }
    }
    let policies: BTreeMap<String, AutoEnroll> = found
        .iter()
        .map(|(n, ws)| (n.clone(), ws.spec.auto_enroll))
        .collect();

    let sync = sync_workspace_labels(
        tn.labels(),
        &tn.spec.workspaces,
        &policies,
        &ctx.base_workspaces,
    );
    if !sync.failing.is_empty() {
        warn!(tenant = %name, failing = ?sync.failing, "tenant references unusable workspaces");
        ctx.publish_warning(tn, REASON_WORKSPACE_FAILING, &sync.failing.join(","))
            .await;
    }
    if let Some(patch) = labels_patch(tn.labels(), &sync.labels) {
        let api: Api<Tenant> = Api::all(ctx.client.clone());
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(tenant = %name, "workspace labels updated");
    }

    let quotas: Vec<&ResourceQuota> = enrolled_workspaces(&tn.spec.workspaces, &sync.failing)
        .filter_map(|e| found.get(&e.name))
        .map(|ws| &ws.spec.quota)
        .collect();
    status.quota = Some(tenant_quota(quotas, tn.spec.quota.as_ref(), ctx.caps)?);
    status.failing_workspaces = sync.failing;
    status.ready = true;
    Ok(())
}

async fn patch_status(api: &Api<Tenant>, name: &str, status: &TenantStatus) {
    let patch = json!({"status": status});
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => info!(tenant = %name, ready = status.ready, "tenant status updated"),
        Err(e) => warn!(tenant = %name, error = %e, "tenant status update failed"),
    }
}
