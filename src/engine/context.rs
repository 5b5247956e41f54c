/*!
 * Execution Context
 *
 * The owner-facing handle to an admitted session. Shares ownership of the
 * session item with the engine; when both the client's context and the
 * engine's master list drop their shares, the session item is destroyed,
 * which fires the deletion callback and releases the admission offer.
 */

use super::EngineShared;
use crate::core::types::{DeviceSpec, Resources, SessionHandle};
use crate::resource::context::ResourceContext;
use crate::session::item::{OperationItem, PagingCallbacks, SessionItem};
use crate::task::OperationTask;
use log::trace;
use std::sync::Arc;

pub struct ExecutionContext {
    shared: Arc<EngineShared>,
    item: Arc<SessionItem>,
}

impl ExecutionContext {
    pub(crate) fn new(shared: Arc<EngineShared>, item: Arc<SessionItem>) -> Self {
        Self { shared, item }
    }

    /// Bind the granted offer to the client's session handle and hand the
    /// session to the scheduler
    pub fn accept_offer(&self, handle: &str) {
        self.shared
            .tracker
            .accept_admission(self.item.offer(), handle);
        self.item.set_handle(handle);
        self.shared.insert_session(Arc::clone(&self.item));
    }

    /// Append an operation to the session's incoming queue
    pub fn enqueue_operation(&self, task: Box<dyn OperationTask>) {
        let op = OperationItem::new(Arc::downgrade(&self.item), task);
        trace!("Operation {} queued", op.task.debug_string());
        self.shared.push_to_session_queue(op);
    }

    /// Install the session's paging protocol, replacing any previous pair
    pub fn register_paging_callbacks(&self, callbacks: PagingCallbacks) {
        self.item.set_paging_callbacks(callbacks);
    }

    /// Stage `res` on `device` for an operation of this session
    pub fn make_resource_context(
        &self,
        device: DeviceSpec,
        res: &Resources,
        missing: &mut Resources,
    ) -> ResourceContext {
        self.shared
            .make_resource_context(Arc::clone(&self.item), device, res, missing)
    }

    /// Tear the session down. `cb` fires once the session item is fully
    /// destroyed, after in-flight operations have drained. The context is
    /// consumed; further use of the session is impossible.
    pub fn delete_session(self, cb: impl FnOnce() + Send + 'static) {
        self.item.prepare_delete(Box::new(cb));
        // Dropping self requests removal and gives up our share of the item
    }

    /// The resource map granted at admission
    pub fn offered_session_resource(&self) -> Option<Resources> {
        self.shared.tracker.usage(self.item.offer())
    }

    pub fn session_handle(&self) -> SessionHandle {
        self.item.handle()
    }

    /// Operations of this session that have run to successful completion
    pub fn total_executed_op(&self) -> u64 {
        self.item.total_executed_op()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.shared.remove_session(Arc::clone(&self.item));
    }
}
