/*!
 * Paging Coordinator
 *
 * Invoked by the scheduler loop when a device runs out of memory. Sessions
 * are ranked by their current usage on the constrained device; the largest
 * consumer is presumed to own the workload and is skipped. The remaining
 * sessions are asked, ticket by ticket, to volunteer allocations into a
 * pre-staged landing reservation on the fallback device. If nobody frees
 * anything, one session is forcibly evicted.
 */

use super::sched_loop::SchedulerLoop;
use crate::core::types::{DeviceSpec, Quantity, ResourceTag, Resources, SessionHandle};
use crate::sched::traits::VictimOrder;
use crate::session::item::SessionItem;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::time::Instant;

impl SchedulerLoop {
    /// Try to reclaim memory on `src` by migrating allocations to `dst`.
    /// Returns true when memory was released or a session was evicted.
    pub(super) fn do_paging(&self, src: DeviceSpec, dst: DeviceSpec) -> bool {
        let start = Instant::now();
        let mut released: Quantity = 0;
        let mut evicted: Option<SessionHandle> = None;

        let reclaimed = self.do_paging_inner(src, dst, &mut released, &mut evicted);

        debug!(
            "Paging {} -> {}: duration {:?} released {} forceevict '{}'",
            src,
            dst,
            start.elapsed(),
            released,
            evicted.unwrap_or_default()
        );
        reclaimed
    }

    fn do_paging_inner(
        &self,
        src: DeviceSpec,
        dst: DeviceSpec,
        released: &mut Quantity,
        evicted: &mut Option<SessionHandle>,
    ) -> bool {
        let src_tag = ResourceTag::memory(src);
        let dst_tag = ResourceTag::memory(dst);

        // Rank sessions by current memory usage on the constrained device
        let mut candidates: Vec<(Quantity, Arc<SessionItem>)> = self
            .sessions
            .iter()
            .map(|sess| {
                let usage = self
                    .shared
                    .monitor
                    .query_usages(&sess.tickets_snapshot())
                    .get(src_tag);
                (usage, Arc::clone(sess))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        if candidates.len() <= 1 {
            error!("Out of memory for one session");
            return false;
        }
        for (usage, sess) in &candidates {
            trace!("Paging candidate {}: usage {}", sess.handle(), usage);
        }

        // Skip the largest consumer; traverse the rest in policy order
        let mut victims: Vec<&(Quantity, Arc<SessionItem>)> = candidates[1..].iter().collect();
        if self.policy.victim_order() == VictimOrder::SmallestFirst {
            victims.reverse();
        }

        for (_, sess) in victims {
            let tickets = sess.tickets_snapshot();
            if tickets.is_empty() {
                continue;
            }
            let ranked = self.shared.monitor.sort_victim(&tickets);

            // The installed callback pair is immutable and replaced as a
            // whole, so holding the Arc keeps it alive for the whole visit
            let Some(callbacks) = sess.paging_callbacks() else {
                continue;
            };

            debug!("Visiting session: {}", sess.handle());
            for (usage, victim) in ranked {
                // Stage an equal-sized landing reservation on the target
                let landing = Resources::of(dst_tag, usage);
                let mut missing = Resources::new();
                let rctx = self.shared.make_resource_context(
                    Arc::clone(sess),
                    dst,
                    &landing,
                    &mut missing,
                );
                if !rctx.is_valid() {
                    error!(
                        "Not enough memory on {} for paging. Required: {} bytes",
                        dst, usage
                    );
                    return false;
                }
                trace!("Requesting page out of {} with usage {}", victim, usage);

                *released += (callbacks.volunteer)(victim, rctx);
                if *released > 0 {
                    debug!("Released {} bytes via paging", released);
                    return true;
                }
                trace!("Page out of {} freed nothing", victim);
            }
        }

        error!("All paging requests failed. Dumping all session usage");
        for (usage, sess) in &candidates {
            error!("Session {} usage on {}: {}", sess.handle(), src, usage);
        }
        error!("Resource monitor: {}", self.shared.monitor.debug_string());

        // Last resort: evict the first session whose owner can be notified
        for (usage, sess) in &candidates {
            let Some(callbacks) = sess.paging_callbacks() else {
                continue;
            };
            *evicted = Some(sess.handle());

            // No more OOM retries for this session's kernels
            sess.set_protect_oom(false);
            sess.set_force_evicted();

            warn!(
                "Force evicting session {} with usage {}",
                sess.handle(),
                usage
            );
            (callbacks.force_evicted)();
            return true;
        }

        error!("Nothing to force evict");
        false
    }
}
