/*!
 * Resource Module
 * Capacity tracking, admission control, and per-operation reservations
 */

pub mod context;
pub mod monitor;
pub mod tracker;
pub mod traits;

pub use context::{OperationScope, ResourceContext};
pub use monitor::{MonitorGuard, ResourceMonitor};
pub use tracker::{OfferId, SessionResourceTracker};
pub use traits::{CapacityProbe, StaticCapacityProbe};
