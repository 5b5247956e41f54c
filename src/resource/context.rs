/*!
 * Resource Context
 *
 * Binds one session, one device, and one staged reservation for the
 * lifetime of an operation. Kernel-side allocations happen through nested
 * operation scopes that either commit into the session's visible usage or
 * roll back; either way the reservation is released on every exit path.
 */

use crate::core::types::{DeviceSpec, Quantity, ResourceKind, ResourceTag, Resources, Ticket};
use crate::resource::monitor::{MonitorGuard, ResourceMonitor};
use crate::session::item::SessionItem;
use log::trace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ResourceContext {
    monitor: Arc<ResourceMonitor>,
    session: Arc<SessionItem>,
    spec: DeviceSpec,
    ticket: Ticket,
    has_staging: AtomicBool,
}

impl ResourceContext {
    pub(crate) fn new(session: Arc<SessionItem>, monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            monitor,
            session,
            spec: DeviceSpec::CPU0,
            ticket: Ticket::INVALID,
            has_staging: AtomicBool::new(false),
        }
    }

    /// Reserve `res` on `spec` as staging. On success the ticket is recorded
    /// in the session; on shortfall the per-tag deficit lands in `missing`.
    pub(crate) fn initialize_staging(
        &mut self,
        spec: DeviceSpec,
        res: &Resources,
        missing: &mut Resources,
    ) -> bool {
        self.spec = spec;
        if let Some(ticket) = self.monitor.pre_allocate(res, missing) {
            self.ticket = ticket;
            self.has_staging.store(true, Ordering::SeqCst);
            self.session.track_ticket(ticket);
        }
        self.has_staging.load(Ordering::SeqCst)
    }

    /// Whether preparation obtained a ticket
    pub fn is_valid(&self) -> bool {
        self.ticket.is_valid()
    }

    pub fn spec(&self) -> DeviceSpec {
        self.spec
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Open a scope over whatever staging remains for `kind` on this
    /// context's device
    pub fn alloc(&self, kind: ResourceKind) -> OperationScope<'_> {
        let mut proxy = self.monitor.lock();
        let tag = ResourceTag::new(kind, self.spec);

        let available = proxy
            .query_staging(self.ticket)
            .map(|staging| staging.get(tag))
            .unwrap_or(0);
        if available == 0 {
            return OperationScope::invalid(self, proxy);
        }

        let res = Resources::of(tag, available);
        let valid = proxy.allocate(self.ticket, &res);
        OperationScope::new(self, proxy, res, valid)
    }

    /// Open a scope over an exact quantity of `kind` on this context's device
    pub fn alloc_exact(&self, kind: ResourceKind, qty: Quantity) -> OperationScope<'_> {
        let mut proxy = self.monitor.lock();
        let res = Resources::of(ResourceTag::new(kind, self.spec), qty);
        let valid = proxy.allocate(self.ticket, &res);
        OperationScope::new(self, proxy, res, valid)
    }

    /// Return a committed quantity to the free pool and drop it from the
    /// session's visible usage
    pub fn dealloc(&self, kind: ResourceKind, qty: Quantity) {
        let tag = ResourceTag::new(kind, self.spec);
        self.monitor.free(self.ticket, &Resources::of(tag, qty));
        self.session.sub_usage(tag, qty);
        if !self.monitor.has_usage(self.ticket) {
            self.session.remove_ticket(self.ticket);
        }
    }

    /// Drop the staging portion; once the committed portion is also gone the
    /// ticket leaves the session. Idempotent.
    pub fn release_staging(&self) {
        if !self.has_staging.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.free_staging(self.ticket);
        if !self.monitor.has_usage(self.ticket) {
            self.session.remove_ticket(self.ticket);
        }
        trace!("Released staging of {}", self.ticket);
    }
}

impl Drop for ResourceContext {
    fn drop(&mut self) {
        self.release_staging();
    }
}

impl fmt::Display for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.ticket.is_valid() {
            write!(f, "AllocationTicket({}, device={})", self.ticket, self.spec)
        } else {
            write!(f, "AllocationTicket(invalid)")
        }
    }
}

/// A tentative sub-allocation within a ticket. Holds the monitor's lock
/// proxy so the allocate/commit/rollback sequence is consistent relative to
/// other contexts. Dropping an uncommitted scope rolls it back.
pub struct OperationScope<'a> {
    ctx: &'a ResourceContext,
    proxy: Option<MonitorGuard<'a>>,
    res: Resources,
    valid: bool,
    finished: bool,
}

impl<'a> OperationScope<'a> {
    fn new(ctx: &'a ResourceContext, proxy: MonitorGuard<'a>, res: Resources, valid: bool) -> Self {
        Self {
            ctx,
            proxy: Some(proxy),
            res,
            valid,
            finished: false,
        }
    }

    fn invalid(ctx: &'a ResourceContext, proxy: MonitorGuard<'a>) -> Self {
        Self::new(ctx, proxy, Resources::new(), false)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn resources(&self) -> &Resources {
        &self.res
    }

    /// Charge the scope's quantities to the session's visible usage
    pub fn commit(mut self) {
        if !self.valid || self.finished {
            return;
        }
        self.finished = true;

        // The monitor lock must not be held while touching the session
        drop(self.proxy.take());
        self.ctx.session.add_usage(&self.res);
        self.ctx.session.notify_memory_allocation(self.ctx.ticket);
    }

    /// Return the scope's quantities to the free pool
    pub fn rollback(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        if !self.valid || self.finished {
            return;
        }
        self.finished = true;
        if let Some(proxy) = self.proxy.as_mut() {
            proxy.free(self.ctx.ticket, &self.res);
        }
    }
}

impl Drop for OperationScope<'_> {
    fn drop(&mut self) {
        self.undo();
    }
}
