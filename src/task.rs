/*!
 * Operation Tasks
 * The contract between the engine and operation implementations
 */

use crate::core::types::{DeviceSpec, Resources};
use crate::resource::context::ResourceContext;
use std::sync::Arc;

/// Completion callbacks handed to a task when it is run. Exactly one of the
/// two must be invoked, once.
pub struct TaskCallbacks {
    /// The operation finished successfully
    pub done: Box<dyn FnOnce() + Send>,
    /// The operation failed with device OOM. Returns true when the engine
    /// takes the task back for a paged retry; false means the failure is the
    /// task's to surface.
    pub mem_failure: Box<dyn FnOnce() -> bool + Send>,
}

/// A schedulable unit of work. Implementations live outside the core and are
/// shared between the scheduler and a worker thread, so interior mutability
/// is theirs to manage.
pub trait OperationTask: Send + Sync {
    /// Validate the task and pick the device it wants to run on.
    /// None means the task cannot run and will be dropped.
    fn prepare(&self) -> Option<DeviceSpec>;

    /// Resources the task expects to use on `device`, reserved as staging
    /// before dispatch
    fn estimated_usage(&self, device: DeviceSpec) -> Resources;

    /// Attach the staged reservation for the upcoming run. Replacing a
    /// previously attached context drops it, releasing its staging.
    fn set_resource_context(&self, ctx: Arc<ResourceContext>);

    fn resource_context(&self) -> Option<Arc<ResourceContext>>;

    /// Execute on a worker thread. The task must invoke exactly one of
    /// `callbacks.done` or `callbacks.mem_failure`.
    fn run(&self, callbacks: TaskCallbacks);

    /// Invoked by the scheduler when the owning session is force-evicted
    /// before the task was dispatched
    fn cancel(&self);

    /// Asynchronous tasks do not suppress OOM detection while in flight
    fn is_async(&self) -> bool {
        false
    }

    fn debug_string(&self) -> String;
}
