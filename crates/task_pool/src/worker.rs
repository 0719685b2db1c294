//! The lifecycle future spawned for every scheduled task

use std::sync::Arc;

use tracing::{instrument, trace};

use crate::cancel::CancelHandle;
use crate::gate::AdmissionRequest;
use crate::scheduler::Inner;
use crate::task::TaskId;

/// Drive one task from `Pending` to `Terminated`.
///
/// Waits for admission unless the handle is raised first, then counts work
/// units until it is raised, then runs the exit path.
#[instrument(name = "task", skip_all, fields(task_id = %task_id))]
pub(crate) async fn run(
    inner: Arc<Inner>,
    task_id: TaskId,
    mut request: AdmissionRequest,
    cancel: CancelHandle,
) {
    let granted = tokio::select! {
        biased;
        _ = cancel.raised() => None,
        permit = request.granted() => permit,
    };

    let permit = match granted {
        Some(permit) => permit,
        // Raised while waiting. If the grant got there first the task is
        // already active and still has to run its exit path.
        None => match inner.abandon_admission(task_id, request) {
            Some(permit) => permit,
            None => return,
        },
    };

    work(&inner, task_id, &cancel).await;
    inner.finish_active(task_id, permit);
}

async fn work(inner: &Inner, task_id: TaskId, cancel: &CancelHandle) {
    let work_unit = inner.work_unit();
    loop {
        tokio::select! {
            biased;
            _ = cancel.raised() => break,
            _ = tokio::time::sleep(work_unit) => {
                match inner.record_progress(task_id) {
                    Ok(work_counter) => trace!(work_counter, "Work unit done"),
                    Err(_) => break,
                }
            }
        }
    }
}
