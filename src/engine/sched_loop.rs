/*!
 * Scheduler Loop
 *
 * One dedicated thread merges session births and deaths into the master
 * list, asks the policy for candidates, dispatches work, detects the
 * no-progress condition that warrants paging, and backs off exponentially
 * when idle. The loop is the sole mutator of the master list, every
 * session's backing queue, and the per-session scheduling flags.
 */

use super::EngineShared;
use crate::core::limits::{
    PAGING_FALLBACK, PAGING_SOURCES, SCHED_IDLE_THRESHOLD, SCHED_INITIAL_BACKOFF,
};
use crate::sched::traits::SchedulerPolicy;
use crate::sched::types::SessionChangeSet;
use crate::session::item::SessionItem;
use log::{debug, error, info, trace};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Back-off state carried across iterations: after `SCHED_IDLE_THRESHOLD`
/// without progress, sleep for a doubling interval starting at
/// `SCHED_INITIAL_BACKOFF`.
struct Backoff {
    last_progress: Instant,
    sleep: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            last_progress: Instant::now(),
            sleep: SCHED_INITIAL_BACKOFF,
        }
    }

    /// Returns true iff a sleep occurred
    fn maybe_wait(&mut self, scheduled: usize) -> bool {
        let now = Instant::now();
        if scheduled > 0 {
            self.last_progress = now;
            self.sleep = SCHED_INITIAL_BACKOFF;
        }

        let idle = now.duration_since(self.last_progress);
        if idle <= SCHED_IDLE_THRESHOLD {
            return false;
        }

        trace!("No progress for {:?}, sleeping {:?}", idle, self.sleep);
        thread::sleep(self.sleep);
        self.sleep *= 2;
        true
    }
}

pub(super) struct SchedulerLoop {
    pub(super) shared: Arc<EngineShared>,
    pub(super) policy: Box<dyn SchedulerPolicy>,
    pub(super) sessions: Vec<Arc<SessionItem>>,
    candidates: Vec<Arc<SessionItem>>,
    backoff: Backoff,
    iteration: u64,
}

impl SchedulerLoop {
    pub(super) fn new(shared: Arc<EngineShared>, policy: Box<dyn SchedulerPolicy>) -> Self {
        Self {
            shared,
            policy,
            sessions: Vec::new(),
            candidates: Vec::new(),
            backoff: Backoff::new(),
            iteration: 0,
        }
    }

    pub(super) fn run(mut self) {
        self.shared
            .monitor
            .initialize_limits(self.shared.probe.as_ref());
        info!(
            "Scheduler loop started with policy '{}'",
            self.shared.config.scheduler_name
        );

        while !self.shared.should_exit.load(Ordering::SeqCst) {
            self.iterate();
        }

        // Sessions self-terminate through their destructors
        self.sessions.clear();
        info!("Scheduler loop exited after {} iterations", self.iteration);
    }

    fn iterate(&mut self) {
        self.iteration += 1;
        let mut change = SessionChangeSet::new();

        // Drain pending deletions and remove them from the master list;
        // keep the references until the policy has seen the change set
        {
            let mut deleted = self.shared.deleted_sessions.lock();
            std::mem::swap(&mut change.deleted, &mut *deleted);
        }
        if !change.deleted.is_empty() {
            self.sessions.retain(|sess| {
                let gone = change.deleted.iter().any(|d| Arc::ptr_eq(d, sess));
                if gone {
                    debug!("Deleting session {}", sess.handle());
                }
                !gone
            });
        }

        // Splice newly admitted sessions onto the end
        {
            let mut incoming = self.shared.new_sessions.lock();
            change.num_added = incoming.len();
            let start = self.sessions.len();
            self.sessions.append(&mut incoming);
            change.added_range = start..self.sessions.len();
        }

        // Prepare each session: pull produced work into the backing queue,
        // cancel everything in evicted sessions, reset scratch state
        let mut total_remaining = 0;
        let enable_oom_protect = self.sessions.len() > 1;
        for sess in &self.sessions {
            sess.splice_into_backing();
            if sess.force_evicted() {
                sess.cancel_backing();
            }
            total_remaining += sess.backing_len();
            sess.set_protect_oom(enable_oom_protect);
            sess.set_last_scheduled(0);
        }

        // Candidate selection
        let mut candidates = std::mem::take(&mut self.candidates);
        self.policy
            .notify_pre_scheduling_iteration(&self.sessions, &change, &mut candidates);
        // Deleted references must not leak beyond selection
        change.deleted.clear();

        // Dispatch from candidates in policy order
        let mut remaining = 0;
        let mut scheduled = 0;
        for sess in &candidates {
            let (count, keep_going) = self.policy.maybe_schedule_from(sess);
            sess.set_last_scheduled(count);
            remaining += sess.backing_len();
            scheduled += count;
            if !keep_going {
                break;
            }
        }
        self.candidates = candidates;

        debug!(
            "Sched iter {}: scheduled {} remaining {} running {} no-paging-running {}",
            self.iteration,
            scheduled,
            remaining,
            self.shared.running_tasks.load(Ordering::SeqCst),
            self.shared.no_paging_running_tasks.load(Ordering::SeqCst)
        );
        for sess in &self.sessions {
            trace!(
                "Sched iter {} session {}: pending {} scheduled {} {}",
                self.iteration,
                sess.handle(),
                sess.backing_len(),
                sess.last_scheduled(),
                self.policy.debug_string(sess)
            );
        }

        // OOM detection: work is pending, nothing moved, and nothing
        // synchronous is in flight that could still free memory
        let no_progress = remaining > 0
            && scheduled == 0
            && self.shared.no_paging_running_tasks.load(Ordering::SeqCst) == 0;
        let mut did_paging = false;
        for device in PAGING_SOURCES {
            if !(no_progress && self.policy.insufficient_memory(*device)) {
                continue;
            }
            if self.sessions.len() > 1 {
                did_paging = self.do_paging(*device, PAGING_FALLBACK);
            } else if self.sessions.len() == 1 {
                let sess = &self.sessions[0];
                error!(
                    "OOM on device {} for single session: {}",
                    device,
                    sess.handle()
                );
                let usage = self.shared.monitor.query_usages(&sess.tickets_snapshot());
                error!("This session usage: {}", usage);
                error!("{}", self.shared.monitor.debug_string());
            }
        }
        // Paging freed something; retry another iteration immediately
        if did_paging {
            return;
        }

        self.backoff.maybe_wait(scheduled);

        if total_remaining == 0 {
            trace!("No pending work; waiting for notification");
            self.shared.has_work.wait();
        }
    }

}
