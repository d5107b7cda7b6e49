use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

pub const REASON_DELETED: &str = "Deleted";
pub const REASON_IDENTITY_DEGRADED: &str = "IdentitySyncFailed";
pub const REASON_WORKSPACE_FAILING: &str = "WorkspaceFailing";

pub async fn emit_event(
    recorder: &Recorder,
    reference: &ObjectReference,
    type_: EventType,
    reason: &str,
    note: Option<String>,
) {
    if let Err(e) = recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: "Reconcile".into(),
                secondary: None,
            },
            reference,
        )
        .await
    {
        debug!(error = %e, reason, "event publish failed");
    }
}
