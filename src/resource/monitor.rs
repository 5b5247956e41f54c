/*!
 * Resource Monitor
 *
 * Per-device capacity tracking and ticket-based reservations.
 *
 * Every reservation is held under a monotonically issued ticket and split
 * into a staging portion (pre-allocated during operation preparation, not
 * yet charged to the owning session) and a committed portion (charged).
 * A ticket whose two portions both reach zero is removed.
 *
 * A single mutex guards the books. `lock()` hands out a proxy so that the
 * multi-step allocate/free sequences of an operation scope observe a
 * consistent view relative to other contexts.
 */

use crate::core::types::{Quantity, ResourceKind, ResourceTag, Resources, Ticket};
use crate::resource::traits::CapacityProbe;
use ahash::RandomState;
use log::{debug, info, trace};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

#[derive(Debug, Default, Clone)]
struct Reservation {
    staging: Resources,
    committed: Resources,
}

impl Reservation {
    fn is_empty(&self) -> bool {
        self.staging.is_empty() && self.committed.is_empty()
    }
}

#[derive(Default)]
struct MonitorInner {
    capacities: Resources,
    // staging + committed summed over all tickets, maintained incrementally
    in_use: Resources,
    tickets: HashMap<Ticket, Reservation, RandomState>,
    last_ticket: u64,
}

impl MonitorInner {
    fn available(&self, tag: ResourceTag) -> Quantity {
        self.capacities.get(tag).saturating_sub(self.in_use.get(tag))
    }
}

pub struct ResourceMonitor {
    inner: Mutex<MonitorInner>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner::default()),
        }
    }

    /// Load per-device capacities from a platform probe
    pub fn initialize_limits(&self, probe: &dyn CapacityProbe) {
        let capacities = probe.device_capacities();
        info!("Resource monitor limits initialized: {}", capacities);
        self.inner.lock().capacities = capacities;
    }

    pub fn capacity(&self, tag: ResourceTag) -> Quantity {
        self.inner.lock().capacities.get(tag)
    }

    /// Atomically reserve `req` as the staging portion of a fresh ticket.
    /// On shortfall, writes the per-tag deficit into `missing` and returns None.
    pub fn pre_allocate(&self, req: &Resources, missing: &mut Resources) -> Option<Ticket> {
        let mut inner = self.inner.lock();

        *missing = Resources::new();
        for (tag, qty) in req.iter() {
            let avail = inner.available(*tag);
            if *qty > avail {
                missing.set(*tag, *qty - avail);
            }
        }
        if !missing.is_empty() {
            trace!("Pre-allocation of {} failed, missing {}", req, missing);
            return None;
        }

        inner.last_ticket += 1;
        let ticket = Ticket::from_raw(inner.last_ticket);
        inner.in_use.merge(req);
        inner.tickets.insert(
            ticket,
            Reservation {
                staging: req.clone(),
                committed: Resources::new(),
            },
        );
        debug!("Pre-allocated {} under {}", req, ticket);
        Some(ticket)
    }

    /// Move `req` into the ticket's committed portion (staging first,
    /// remainder from free space). All-or-nothing.
    pub fn allocate(&self, ticket: Ticket, req: &Resources) -> bool {
        self.lock().allocate(ticket, req)
    }

    /// Return `req` from the committed portion to free space
    pub fn free(&self, ticket: Ticket, req: &Resources) -> bool {
        self.lock().free(ticket, req)
    }

    /// Drop whatever staging the ticket still holds
    pub fn free_staging(&self, ticket: Ticket) {
        let mut inner = self.inner.lock();
        let staging = match inner.tickets.get_mut(&ticket) {
            Some(resv) => std::mem::take(&mut resv.staging),
            None => return,
        };
        inner.in_use.remove_all(&staging);
        if inner.tickets.get(&ticket).is_some_and(|r| r.is_empty()) {
            inner.tickets.remove(&ticket);
            trace!("{} fully released", ticket);
        }
    }

    /// Whether the ticket still holds any reservation
    pub fn has_usage(&self, ticket: Ticket) -> bool {
        self.inner.lock().tickets.contains_key(&ticket)
    }

    /// Sum of committed quantities per tag across a set of tickets
    pub fn query_usages(&self, tickets: &HashSet<Ticket, RandomState>) -> Resources {
        let inner = self.inner.lock();
        let mut total = Resources::new();
        for ticket in tickets {
            if let Some(resv) = inner.tickets.get(ticket) {
                total.merge(&resv.committed);
            }
        }
        total
    }

    /// Committed reservation of a single ticket
    pub fn query_usage(&self, ticket: Ticket) -> Option<Resources> {
        self.inner
            .lock()
            .tickets
            .get(&ticket)
            .map(|resv| resv.committed.clone())
    }

    /// Tickets ranked by decreasing committed memory, zero-usage tickets
    /// omitted. The ranking is the paging coordinator's victim order.
    pub fn sort_victim(&self, tickets: &HashSet<Ticket, RandomState>) -> Vec<(Quantity, Ticket)> {
        let inner = self.inner.lock();
        let mut ranked: Vec<(Quantity, Ticket)> = tickets
            .iter()
            .filter_map(|ticket| {
                let resv = inner.tickets.get(ticket)?;
                let mem = resv.committed.kind_total(ResourceKind::Memory);
                (mem > 0).then_some((mem, *ticket))
            })
            .collect();
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked
    }

    /// Exclusive proxy for a sequence of allocate/free/query calls that must
    /// observe a consistent view
    pub fn lock(&self) -> MonitorGuard<'_> {
        MonitorGuard {
            inner: self.inner.lock(),
        }
    }

    /// Rendering of the full books, for failure logging
    pub fn debug_string(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        let _ = write!(
            out,
            "capacities: {} in use: {} tickets: [",
            inner.capacities, inner.in_use
        );
        let mut tickets: Vec<_> = inner.tickets.iter().collect();
        tickets.sort_unstable_by_key(|(ticket, _)| **ticket);
        for (i, (ticket, resv)) in tickets.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            let _ = write!(
                out,
                "{} staging: {} committed: {}",
                ticket, resv.staging, resv.committed
            );
        }
        let _ = write!(out, "]");
        out
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Short-lived exclusive view of the monitor
pub struct MonitorGuard<'a> {
    inner: MutexGuard<'a, MonitorInner>,
}

impl MonitorGuard<'_> {
    /// Commit `req` under `ticket`, drawing the ticket's staging balance
    /// down first and only the remainder from free space. Fails without
    /// side effects when the remainder does not fit.
    pub fn allocate(&mut self, ticket: Ticket, req: &Resources) -> bool {
        let MonitorInner {
            capacities,
            in_use,
            tickets,
            ..
        } = &mut *self.inner;

        let resv = match tickets.get_mut(&ticket) {
            Some(resv) => resv,
            None => return false,
        };

        // Portion not covered by staging must come from free space
        let mut extra = Resources::new();
        for (tag, qty) in req.iter() {
            let from_staging = resv.staging.get(*tag).min(*qty);
            if *qty > from_staging {
                extra.set(*tag, *qty - from_staging);
            }
        }
        for (tag, qty) in extra.iter() {
            let avail = capacities.get(*tag).saturating_sub(in_use.get(*tag));
            if *qty > avail {
                return false;
            }
        }

        for (tag, qty) in req.iter() {
            let from_staging = resv.staging.get(*tag).min(*qty);
            resv.staging.sub(*tag, from_staging);
            resv.committed.add(*tag, *qty);
        }
        in_use.merge(&extra);
        true
    }

    /// Return `req` from the ticket's committed portion to free space.
    /// Fails when the ticket does not hold that much.
    pub fn free(&mut self, ticket: Ticket, req: &Resources) -> bool {
        let MonitorInner {
            in_use, tickets, ..
        } = &mut *self.inner;

        let resv = match tickets.get_mut(&ticket) {
            Some(resv) => resv,
            None => return false,
        };
        if !req.fits_in(&resv.committed) {
            return false;
        }

        resv.committed.remove_all(req);
        in_use.remove_all(req);
        if resv.is_empty() {
            tickets.remove(&ticket);
            trace!("{} fully released", ticket);
        }
        true
    }

    /// Remaining staging balance of the ticket
    pub fn query_staging(&self, ticket: Ticket) -> Option<Resources> {
        self.inner
            .tickets
            .get(&ticket)
            .map(|resv| resv.staging.clone())
    }
}
