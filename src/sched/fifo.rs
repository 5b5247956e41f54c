/*!
 * FIFO Policy
 *
 * The default scheduler policy: candidates in insertion order, every
 * session attempted each iteration, per-session dispatch strictly FIFO
 * until a resource shortfall or worker-pool back-pressure stops it.
 */

use crate::core::types::{DeviceSpec, ResourceTag, Resources};
use crate::engine::EngineHandle;
use crate::sched::traits::SchedulerPolicy;
use crate::sched::types::SessionChangeSet;
use crate::session::item::{OpItem, SessionItem};
use ahash::RandomState;
use log::error;
use std::collections::HashMap;
use std::sync::Arc;

enum ScheduleOutcome {
    Submitted,
    Dropped,
    Defer(OpItem),
}

pub struct FifoPolicy {
    engine: EngineHandle,
    // Per-device shortfall observed this iteration
    missing: HashMap<DeviceSpec, Resources, RandomState>,
}

impl FifoPolicy {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            missing: HashMap::with_hasher(RandomState::new()),
        }
    }

    fn try_schedule(&mut self, session: &Arc<SessionItem>, op: OpItem) -> ScheduleOutcome {
        let Some(device) = op.task.prepare() else {
            error!(
                "Dropping operation that failed to prepare: {} in session {}",
                op.task.debug_string(),
                session.handle()
            );
            return ScheduleOutcome::Dropped;
        };

        let usage = op.task.estimated_usage(device);
        let mut missing = Resources::new();
        let rctx =
            self.engine
                .make_resource_context(Arc::clone(session), device, &usage, &mut missing);
        if !rctx.is_valid() {
            self.missing.entry(device).or_default().merge(&missing);
            return ScheduleOutcome::Defer(op);
        }

        op.task.set_resource_context(Arc::new(rctx));
        match self.engine.submit(op) {
            None => ScheduleOutcome::Submitted,
            Some(op) => ScheduleOutcome::Defer(op),
        }
    }
}

impl SchedulerPolicy for FifoPolicy {
    fn notify_pre_scheduling_iteration(
        &mut self,
        sessions: &[Arc<SessionItem>],
        _change: &SessionChangeSet,
        candidates: &mut Vec<Arc<SessionItem>>,
    ) {
        self.missing.clear();
        candidates.clear();
        candidates.extend(sessions.iter().cloned());
    }

    fn maybe_schedule_from(&mut self, session: &Arc<SessionItem>) -> (usize, bool) {
        let mut scheduled = 0;
        while let Some(op) = session.pop_backing() {
            match self.try_schedule(session, op) {
                ScheduleOutcome::Submitted => scheduled += 1,
                ScheduleOutcome::Dropped => {}
                ScheduleOutcome::Defer(op) => {
                    session.push_backing_front(op);
                    break;
                }
            }
        }
        (scheduled, true)
    }

    fn insufficient_memory(&self, device: DeviceSpec) -> bool {
        self.missing
            .get(&device)
            .is_some_and(|missing| missing.get(ResourceTag::memory(device)) > 0)
    }

    fn debug_string(&self, session: &Arc<SessionItem>) -> String {
        format!(
            "fifo pending={} scheduled={}",
            session.backing_len(),
            session.last_scheduled()
        )
    }
}
