use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::events::{REASON_DELETED, REASON_IDENTITY_DEGRADED};
use super::forge;
use super::{
    ControllerContext, ReconcileErr, add_finalizer, delete_ignore_missing, failure_key,
    has_finalizer, remove_finalizer,
};
use crate::crd::tenant::{Tenant, remove_workspace_entry};
use crate::crd::workspace::{Workspace, WorkspaceStatus};
use crate::crd::{KEYCLOAK_SUBSCRIPTION, SubscriptionStatus, workspace_label_key};
use crate::identity::{self, IdentityActor, IdentityError};

#[instrument(skip_all, fields(workspace = %obj.name_any()))]
pub async fn reconcile_workspace(
    obj: Arc<Workspace>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let name = obj.name_any();
    let api: Api<Workspace> = Api::all(ctx.client.clone());

    let Some(ws) = api.get_opt(&name).await? else {
        info!(workspace = %name, "reconcile: workspace gone");
        return Ok(Action::await_change());
    };

    if !ctx.target_label.is_included(ws.labels()) {
        info!(workspace = %name, "reconcile: not owned by this instance, skipping");
        return Ok(Action::await_change());
    }

    let original = ws.status.clone().unwrap_or_default();
    let mut status = original.clone();

    if ws.meta().deletion_timestamp.is_some() {
        status.ready = false;
        return match delete_workspace(&ws, &ctx).await {
            Ok(()) => {
                info!(workspace = %name, "reconcile: workspace teardown complete");
                ctx.failures.clear(&failure_key::<Workspace>(&name));
                Ok(Action::await_change())
            }
            Err(e) => {
                patch_status_if_changed(&api, &name, &original, &status).await;
                Err(e)
            }
        };
    }

    let result = converge_workspace(&ws, &ctx, &mut status).await;
    patch_status_if_changed(&api, &name, &original, &status).await;
    result?;

    ctx.failures.clear(&failure_key::<Workspace>(&name));
    Ok(ctx.reschedule.action())
}

/// One convergence pass. Fatal failures abort with an error; identity sync
/// failures only degrade the subscription status.
async fn converge_workspace(
    ws: &Workspace,
    ctx: &ControllerContext,
    status: &mut WorkspaceStatus,
) -> Result<(), ReconcileErr> {
    let name = ws.name_any();
    let api: Api<Workspace> = Api::all(ctx.client.clone());
    status.ready = false;

    if !has_finalizer(ws.meta()) {
        add_finalizer(&api, ws.meta()).await?;
        info!(workspace = %name, "reconcile: finalizer added");
    }

    if let Err(e) = enforce_namespace(ws, ctx).await {
        status.namespace.created = false;
        error!(workspace = %name, error = %e, "reconcile: namespace enforcement failed");
        return Err(e);
    }
    status.namespace.name = forge::namespace_name(&name);
    status.namespace.created = true;

    enforce_cluster_role_bindings(ws, ctx).await?;
    enforce_role_bindings(ws, ctx, status.namespace.created).await?;
    super::autoenroll::enforce_autoenroll(ws, ctx).await?;

    let identity_ok = match enforce_identity_roles(ws, ctx.identity.as_ref()).await {
        Ok(sub) => {
            status
                .subscriptions
                .insert(KEYCLOAK_SUBSCRIPTION.to_string(), sub);
            true
        }
        Err(e) => {
            error!(workspace = %name, error = %e, "reconcile: identity role sync failed");
            status
                .subscriptions
                .insert(KEYCLOAK_SUBSCRIPTION.to_string(), SubscriptionStatus::Failed);
            ctx.publish_warning(ws, REASON_IDENTITY_DEGRADED, &e.to_string())
                .await;
            false
        }
    };

    status.ready = identity_ok;
    Ok(())
}

async fn enforce_namespace(ws: &Workspace, ctx: &ControllerContext) -> Result<(), ReconcileErr> {
    let ns = forge::namespace(&ws.name_any(), &ctx.target_label, ws.controller_owner_ref(&()));
    let api: Api<Namespace> = Api::all(ctx.client.clone());
    let ns_name = forge::namespace_name(&ws.name_any());
    api.patch(&ns_name, &ctx.apply_params(), &Patch::Apply(&ns)).await?;
    Ok(())
}

async fn enforce_cluster_role_bindings(
    ws: &Workspace,
    ctx: &ControllerContext,
) -> Result<(), ReconcileErr> {
    let api: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    for crb in forge::cluster_role_bindings(&ws.name_any(), ws.controller_owner_ref(&())) {
        let crb_name = crb.name_any();
        api.patch(&crb_name, &ctx.apply_params(), &Patch::Apply(&crb))
            .await?;
    }
    Ok(())
}

async fn enforce_role_bindings(
    ws: &Workspace,
    ctx: &ControllerContext,
    namespace_created: bool,
) -> Result<(), ReconcileErr> {
    let name = ws.name_any();
    if !namespace_created {
        return Err(ReconcileErr::Precondition(format!(
            "namespace for workspace {name} not created"
        )));
    }
    let api: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), &forge::namespace_name(&name));
    for rb in forge::role_bindings(&name, ws.controller_owner_ref(&())) {
        let rb_name = rb.name_any();
        api.patch(&rb_name, &ctx.apply_params(), &Patch::Apply(&rb))
            .await?;
    }
    Ok(())
}

/// Creates the manager and user roles of `ws` when missing.
///
/// An uninitialized actor yields `Failed` without error: the platform runs
/// without identity sync.
pub async fn enforce_identity_roles(
    ws: &Workspace,
    identity: &dyn IdentityActor,
) -> Result<SubscriptionStatus, IdentityError> {
    let name = ws.name_any();
    if !identity.is_initialized() {
        warn!(workspace = %name, "identity actor not initialized, skipping role sync");
        return Ok(SubscriptionStatus::Failed);
    }
    let pretty = &ws.spec.pretty_name;
    identity::ensure_role(
        identity,
        &identity::manager_role_name(&name),
        &format!("{pretty} Manager"),
    )
    .await?;
    identity::ensure_role(
        identity,
        &identity::user_role_name(&name),
        &format!("{pretty} User"),
    )
    .await?;
    Ok(SubscriptionStatus::Ok)
}

/// Ordered teardown. Any failure aborts and leaves the finalizer in place.
async fn delete_workspace(ws: &Workspace, ctx: &ControllerContext) -> Result<(), ReconcileErr> {
    let name = ws.name_any();
    unsubscribe_tenants(&name, ctx).await?;
    delete_identity_roles(&name, ctx.identity.as_ref()).await?;
    enforce_subresources_absence(ws, ctx).await?;

    if has_finalizer(ws.meta()) {
        let api: Api<Workspace> = Api::all(ctx.client.clone());
        remove_finalizer(&api, ws.meta()).await?;
        ctx.publish_normal(ws, REASON_DELETED, "workspace resources released")
            .await;
    }
    Ok(())
}

async fn unsubscribe_tenants(workspace: &str, ctx: &ControllerContext) -> Result<(), ReconcileErr> {
    let tenants: Api<Tenant> = Api::all(ctx.client.clone());
    let lp = ListParams::default().labels(&workspace_label_key(workspace));
    for tn in tenants.list(&lp).await? {
        let mut workspaces = tn.spec.workspaces.clone();
        if !remove_workspace_entry(&mut workspaces, workspace) {
            continue;
        }
        let patch = json!({
            "metadata": {"resourceVersion": tn.resource_version()},
            "spec": {"workspaces": workspaces},
        });
        tenants
            .patch(&tn.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(workspace = %workspace, tenant = %tn.name_any(), "tenant unsubscribed");
    }
    Ok(())
}

pub async fn delete_identity_roles(
    workspace: &str,
    identity: &dyn IdentityActor,
) -> Result<(), IdentityError> {
    if !identity.is_initialized() {
        warn!(workspace = %workspace, "identity actor not initialized, skipping role deletion");
        return Ok(());
    }
    identity
        .delete_role(&identity::manager_role_name(workspace))
        .await?;
    identity
        .delete_role(&identity::user_role_name(workspace))
        .await?;
    Ok(())
}

async fn enforce_subresources_absence(
    ws: &Workspace,
    ctx: &ControllerContext,
) -> Result<(), ReconcileErr> {
    let name = ws.name_any();
    let ns_name = forge::namespace_name(&name);
    let ns_created = ws
        .status
        .as_ref()
        .is_some_and(|s| s.namespace.created);

    if ns_created {
        let rbs: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), &ns_name);
        for (role, _) in forge::NAMESPACE_ROLES {
            delete_ignore_missing(&rbs, role).await?;
        }
    }

    let crbs: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    for role in forge::CLUSTER_ROLES {
        delete_ignore_missing(&crbs, &forge::cluster_role_binding_name(role, &name)).await?;
    }

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    delete_ignore_missing(&namespaces, &ns_name).await?;
    Ok(())
}

async fn patch_status_if_changed(
    api: &Api<Workspace>,
    name: &str,
    original: &WorkspaceStatus,
    status: &WorkspaceStatus,
) {
    if original == status {
        return;
    }
    let patch = json!({"status": status});
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => info!(workspace = %name, ready = status.ready, "workspace status updated"),
        Err(e) => error!(workspace = %name, error = %e, "workspace status update failed"),
    }
}
