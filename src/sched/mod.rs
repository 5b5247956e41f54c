/*!
 * Scheduler Module
 * Policy abstraction, registry, and the default FIFO policy
 */

pub mod fifo;
pub mod registry;
pub mod traits;
pub mod types;

pub use fifo::FifoPolicy;
pub use registry::{PolicyFactory, SchedulerRegistry};
pub use traits::{SchedulerPolicy, VictimOrder};
pub use types::SessionChangeSet;
