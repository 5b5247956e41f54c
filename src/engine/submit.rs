/*!
 * Task Submission
 * Hand-off of prepared operations to the worker pool and the in-flight
 * counter bookkeeping around their completion callbacks
 */

use super::EngineShared;
use crate::session::item::{OpItem, OperationItem};
use crate::task::TaskCallbacks;
use log::{debug, error};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl EngineShared {
    /// Submit one operation to the pool. Returns the operation back when
    /// the pool is saturated; None when it was accepted, or dropped because
    /// its session expired or its resource context never initialized.
    pub(crate) fn submit_task(self: &Arc<Self>, op: OpItem) -> Option<OpItem> {
        let Some(session) = op.session() else {
            return None;
        };

        let context_ok = op
            .task
            .resource_context()
            .is_some_and(|rctx| rctx.is_valid());
        if !context_ok {
            error!(
                "Submitted task with uninitialized resource context: {} in session {}",
                op.task.debug_string(),
                session.handle()
            );
            return None;
        }

        let shared = Arc::clone(self);
        let job_op = Arc::clone(&op);
        let job: Box<dyn FnOnce() + Send> = Box::new(move || {
            // Holds a strong share of the session until the run returns
            let Some(session) = job_op.session() else {
                return;
            };

            let done: Box<dyn FnOnce() + Send> = {
                let shared = Arc::clone(&shared);
                let op = Arc::clone(&job_op);
                Box::new(move || shared.task_stopped(&op, false))
            };
            let mem_failure: Box<dyn FnOnce() -> bool + Send> = {
                let shared = Arc::clone(&shared);
                let op = Arc::clone(&job_op);
                Box::new(move || {
                    // Counters and staging are settled on every failure
                    // branch, retried or not
                    shared.task_stopped(&op, true);

                    let Some(session) = op.session() else {
                        debug!(
                            "Expired session during memory failure of {}",
                            op.task.debug_string()
                        );
                        return false;
                    };
                    if !session.protect_oom() {
                        debug!(
                            "Passing OOM failed task back to client: {}",
                            op.task.debug_string()
                        );
                        return false;
                    }

                    // Failed under memory pressure; queue for a paged retry
                    debug!("Putting back OOM failed task: {}", op.task.debug_string());
                    shared.push_to_session_queue(Arc::clone(&op));
                    true
                })
            };

            debug!(
                "Running {} in session {}",
                job_op.task.debug_string(),
                session.handle()
            );
            shared.task_running(&job_op);
            job_op.task.run(TaskCallbacks { done, mem_failure });
        });

        match self.pool.try_run(job) {
            None => None,
            Some(_job) => Some(op),
        }
    }

    pub(crate) fn task_running(&self, op: &OperationItem) {
        self.running_tasks.fetch_add(1, Ordering::SeqCst);
        if !op.task.is_async() {
            self.no_paging_running_tasks.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn task_stopped(&self, op: &OperationItem, failed: bool) {
        if let Some(rctx) = op.task.resource_context() {
            rctx.release_staging();
        }

        if !failed {
            if let Some(session) = op.session() {
                session.inc_executed();
            }
        }

        self.running_tasks.fetch_sub(1, Ordering::SeqCst);
        if !op.task.is_async() {
            self.no_paging_running_tasks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
