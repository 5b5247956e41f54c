/*!
 * Scheduler Policy
 * Pluggable candidate selection and dispatch strategy
 */

use crate::core::types::DeviceSpec;
use crate::sched::types::SessionChangeSet;
use crate::session::item::SessionItem;
use std::sync::Arc;

/// Traversal order over paging victims after the largest consumer is skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimOrder {
    /// Page out the heaviest remaining session first (observed engine
    /// behavior)
    LargestFirst,
    /// Page out the lightest remaining session first
    SmallestFirst,
}

/// Strategy consulted by the scheduler loop once per iteration. Implementors
/// run on the scheduler thread; `&mut self` state needs no synchronization.
pub trait SchedulerPolicy: Send {
    /// Populate `candidates` with the sessions to attempt this iteration, in
    /// desired order. `change` describes admissions and deletions since the
    /// previous iteration.
    fn notify_pre_scheduling_iteration(
        &mut self,
        sessions: &[Arc<SessionItem>],
        change: &SessionChangeSet,
        candidates: &mut Vec<Arc<SessionItem>>,
    );

    /// Drain zero or more operations from the session's backing queue,
    /// preparing and submitting them. Returns the dispatched count and
    /// whether the loop should keep trying further candidates.
    fn maybe_schedule_from(&mut self, session: &Arc<SessionItem>) -> (usize, bool);

    /// Asked on no-progress to confirm that paging on `device` is warranted
    fn insufficient_memory(&self, device: DeviceSpec) -> bool;

    /// How the paging coordinator should traverse the non-largest victims
    fn victim_order(&self) -> VictimOrder {
        VictimOrder::LargestFirst
    }

    /// Diagnostic rendering of per-session policy state
    fn debug_string(&self, session: &Arc<SessionItem>) -> String;
}
