pub mod autoenroll;
pub mod cache;
pub mod events;
pub mod forge;
pub mod tenant;
pub mod workspace;


use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, DeleteParams, Patch, PatchParams},
    runtime::{
        Controller,
        controller::{self, Action},
        events::{EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config,
    },
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::tenant::Tenant;
use crate::crd::workspace::Workspace;
use crate::crd::{FINALIZER, MANAGED_BY_LABEL};
use crate::identity::{IdentityActor, IdentityError};
use crate::label::{KvLabel, LabelError};
use crate::quota::{QuantityError, QuotaCaps};
use crate::reschedule::Rescheduler;
use cache::FailureCache;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid quantity: {0}")]
    Quantity(#[from] QuantityError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub struct ControllerContext {
    pub client: Client,
    pub target_label: KvLabel,
    pub identity: Arc<dyn IdentityActor>,
    pub reschedule: Rescheduler,
    pub field_manager: String,
    pub base_workspaces: Vec<String>,
    pub caps: QuotaCaps,
    pub failures: FailureCache,
    pub recorder: Recorder,
}

impl ControllerContext {
    pub fn new(
        client: Client,
        cfg: &OperatorConfig,
        identity: Arc<dyn IdentityActor>,
    ) -> Result<Self, LabelError> {
        let recorder = Recorder::new(
            client.clone(),
            Reporter {
                controller: cfg.field_manager.clone(),
                instance: std::env::var("POD_NAME").ok(),
            },
        );
        Ok(Self {
            client,
            target_label: cfg.target_label()?,
            identity,
            reschedule: cfg.rescheduler(),
            field_manager: cfg.field_manager.clone(),
            base_workspaces: cfg.base_workspaces(),
            caps: cfg.quota_caps(),
            failures: FailureCache::new(),
            recorder,
        })
    }

    /// Server-side apply owned by this operator.
    pub fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    pub async fn publish_normal<K>(&self, obj: &K, reason: &str, note: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        events::emit_event(
            &self.recorder,
            &obj.object_ref(&()),
            EventType::Normal,
            reason,
            Some(note.to_string()),
        )
        .await;
    }

    pub async fn publish_warning<K>(&self, obj: &K, reason: &str, note: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        events::emit_event(
            &self.recorder,
            &obj.object_ref(&()),
            EventType::Warning,
            reason,
            Some(note.to_string()),
        )
        .await;
    }
}

/// Key of an object in the failure cache, e.g. `Workspace/ws1`.
pub fn failure_key<K: Resource<DynamicType = ()>>(name: &str) -> String {
    format!("{}/{}", K::kind(&()), name)
}

pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Finalizer list with ours appended or removed.
pub fn finalizers_with(meta: &ObjectMeta, present: bool) -> Vec<String> {
    let mut finals: Vec<String> = meta
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    if present {
        finals.push(FINALIZER.to_string());
    }
    finals
}

async fn patch_finalizers<K>(
    api: &Api<K>,
    meta: &ObjectMeta,
    present: bool,
) -> Result<(), ReconcileErr>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| ReconcileErr::Internal("object without name".into()))?;
    // metadata-only patch so status is preserved; resourceVersion guards against lost updates
    let patch = json!({
        "metadata": {
            "resourceVersion": meta.resource_version,
            "finalizers": finalizers_with(meta, present),
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

pub async fn add_finalizer<K>(api: &Api<K>, meta: &ObjectMeta) -> Result<(), ReconcileErr>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    patch_finalizers(api, meta, true).await
}

pub async fn remove_finalizer<K>(api: &Api<K>, meta: &ObjectMeta) -> Result<(), ReconcileErr>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    patch_finalizers(api, meta, false).await
}

/// Deletes `name`, treating an already absent object as success.
pub async fn delete_ignore_missing<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Merge patch turning `old` labels into `new`; removed keys map to null.
pub fn labels_patch(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Option<serde_json::Value> {
    if old == new {
        return None;
    }
    let mut labels = serde_json::Map::new();
    for k in old.keys().filter(|k| !new.contains_key(*k)) {
        labels.insert(k.clone(), serde_json::Value::Null);
    }
    for (k, v) in new {
        if old.get(k) != Some(v) {
            labels.insert(k.clone(), json!(v));
        }
    }
    Some(json!({"metadata": {"labels": labels}}))
}

/// Label selector matching the objects created for workspaces.
pub fn owned_selector() -> String {
    format!("{MANAGED_BY_LABEL}=workspace")
}

fn error_policy<K>(obj: Arc<K>, error: &ReconcileErr, ctx: Arc<ControllerContext>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let name = obj.name_any();
    let delay = ctx.failures.record_failure(&failure_key::<K>(&name));
    warn!(kind = %K::kind(&()), %name, error = %error, retry_in = ?delay, "reconcile failed");
    Action::requeue(delay)
}

pub async fn run_workspace_controller(
    ctx: Arc<ControllerContext>,
    concurrency: u16,
    shutdown: CancellationToken,
) {
    let api: Api<Workspace> = Api::all(ctx.client.clone());
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let cluster_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let bindings: Api<RoleBinding> = Api::all(ctx.client.clone());
    let selector = ctx.target_label.selector();
    let managed = Config::default().labels(&owned_selector());
    info!(%selector, concurrency, "starting workspace controller");

    Controller::new(api, Config::default().labels(&selector))
        .owns(namespaces, managed.clone())
        .owns(cluster_bindings, managed.clone())
        .owns(bindings, managed)
        .with_config(controller::Config::default().concurrency(concurrency))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(workspace::reconcile_workspace, error_policy::<Workspace>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(workspace = %obj_ref.name, requeue = ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "workspace reconcile error"),
            }
        })
        .await;
}

pub async fn run_tenant_controller(
    ctx: Arc<ControllerContext>,
    concurrency: u16,
    shutdown: CancellationToken,
    triggers: mpsc::Receiver<String>,
) {
    let api: Api<Tenant> = Api::all(ctx.client.clone());
    let workspaces: Api<Workspace> = Api::all(ctx.client.clone());
    let selector = ctx.target_label.selector();
    info!(%selector, concurrency, "starting tenant controller");

    let controller = Controller::new(api, Config::default().labels(&selector));
    let store = controller.store();
    let triggers = ReceiverStream::new(triggers).map(|name| ObjectRef::<Tenant>::new(&name));

    controller
        .watches(workspaces, Config::default(), move |ws| {
            let ws_name = ws.name_any();
            store
                .state()
                .into_iter()
                .filter(|tn| tn.spec.workspaces.iter().any(|e| e.name == ws_name))
                .map(|tn| ObjectRef::from_obj(tn.as_ref()))
                .collect::<Vec<_>>()
        })
        .reconcile_on(triggers)
        .with_config(controller::Config::default().concurrency(concurrency))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(tenant::reconcile_tenant, error_policy::<Tenant>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(tenant = %obj_ref.name, requeue = ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "tenant reconcile error"),
            }
        })
        .await;
}
