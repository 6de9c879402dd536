use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

use super::{Outcome, ReconcileErr};
use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;

pub const REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Publish a Kubernetes event for a finished pass. Waits and requeues are
/// not reported.
pub async fn report_result(
    recorder: &Recorder,
    obj: &CephBlockPoolRadosNamespace,
    result: &Result<Outcome, ReconcileErr>,
) {
    let event = match result {
        Ok(Outcome::NoOp) if !obj.is_deleting() => Event {
            type_: EventType::Normal,
            reason: REASON_RECONCILE_SUCCEEDED.into(),
            note: Some("successfully configured CephBlockPoolRadosNamespace".into()),
            action: "Reconcile".into(),
            secondary: None,
        },
        Ok(_) => return,
        Err(e) => Event {
            type_: EventType::Warning,
            reason: REASON_RECONCILE_FAILED.into(),
            note: Some(e.to_string()),
            action: "Reconcile".into(),
            secondary: None,
        },
    };
    if let Err(e) = recorder.publish(&event, &obj.object_ref(&())).await {
        debug!(error = %e, "failed to publish event");
    }
}
