/*!
 * AI-OS Execution Engine
 *
 * Multi-tenant scheduling of short-lived compute operations across
 * heterogeneous devices. Sessions are admitted under a global resource
 * budget, their operations flow through a pluggable scheduling policy into
 * a bounded worker pool, and device-memory exhaustion is resolved by
 * cooperative paging to a fallback device or, as a last resort, forced
 * eviction.
 */

pub mod core;
pub mod engine;
pub mod resource;
pub mod sched;
pub mod session;
pub mod task;
pub mod worker;

pub use crate::core::errors::{EngineError, EngineResult};
pub use crate::core::types::{
    DeviceKind, DeviceSpec, Quantity, ResourceKind, ResourceTag, Resources, SessionHandle, Ticket,
};
pub use crate::engine::{EngineConfig, EngineHandle, ExecutionContext, ExecutionEngine};
pub use crate::resource::{
    CapacityProbe, OfferId, OperationScope, ResourceContext, ResourceMonitor,
    SessionResourceTracker, StaticCapacityProbe,
};
pub use crate::sched::{
    FifoPolicy, PolicyFactory, SchedulerPolicy, SchedulerRegistry, SessionChangeSet, VictimOrder,
};
pub use crate::session::{OpItem, OperationItem, PagingCallbacks, SessionItem};
pub use crate::task::{OperationTask, TaskCallbacks};
pub use crate::worker::WorkerPool;
