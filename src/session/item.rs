/*!
 * Session Item
 *
 * Per-session state shared between producers, the scheduler thread, and
 * worker threads.
 *
 * Locking: the main mutex guards the incoming queue, paging callbacks,
 * cached usage, and the deletion callback; the tickets mutex guards the
 * ticket set. When both are needed, tickets is taken first. The backing
 * queue and the scratch flags are touched only by the scheduler thread;
 * flags are atomics so completion callbacks can read them.
 */

use crate::core::types::{Quantity, ResourceTag, Resources, SessionHandle, Ticket};
use crate::resource::context::ResourceContext;
use crate::resource::tracker::{OfferId, SessionResourceTracker};
use crate::task::OperationTask;
use ahash::RandomState;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Owner-supplied paging protocol, installed once per session and replaced
/// atomically as a whole
pub struct PagingCallbacks {
    /// Asked to migrate the victim ticket's data into the staged destination
    /// context; returns the number of bytes actually released on the source
    /// device
    pub volunteer: Box<dyn Fn(Ticket, ResourceContext) -> Quantity + Send + Sync>,
    /// The engine gave up on cooperation and evicted the session
    pub force_evicted: Box<dyn Fn() + Send + Sync>,
}

/// A queued operation: the task plus a non-owning reference to its session.
/// The weak reference lets the scheduler silently discard work whose session
/// has been deleted.
pub struct OperationItem {
    pub(crate) sess: Weak<SessionItem>,
    pub task: Box<dyn OperationTask>,
}

/// Operations travel through queues and worker closures behind an Arc
pub type OpItem = Arc<OperationItem>;

impl OperationItem {
    pub(crate) fn new(sess: Weak<SessionItem>, task: Box<dyn OperationTask>) -> OpItem {
        Arc::new(Self { sess, task })
    }

    pub fn session(&self) -> Option<Arc<SessionItem>> {
        self.sess.upgrade()
    }
}

struct SessionMain {
    queue: VecDeque<OpItem>,
    paging_cb: Option<Arc<PagingCallbacks>>,
    usage: Resources,
    delete_cb: Option<Box<dyn FnOnce() + Send>>,
}

pub struct SessionItem {
    handle: RwLock<SessionHandle>,
    tracker: Arc<SessionResourceTracker>,
    offer: OfferId,

    main: Mutex<SessionMain>,
    tickets: Mutex<HashSet<Ticket, RandomState>>,

    // Scheduler-thread scratch state
    backing: Mutex<VecDeque<OpItem>>,
    protect_oom: AtomicBool,
    force_evicted: AtomicBool,
    last_scheduled: AtomicUsize,
    total_executed_op: AtomicU64,
}

impl SessionItem {
    pub(crate) fn new(tracker: Arc<SessionResourceTracker>, offer: OfferId) -> Self {
        Self {
            handle: RwLock::new(SessionHandle::new()),
            tracker,
            offer,
            main: Mutex::new(SessionMain {
                queue: VecDeque::new(),
                paging_cb: None,
                usage: Resources::new(),
                delete_cb: None,
            }),
            tickets: Mutex::new(HashSet::with_hasher(RandomState::new())),
            backing: Mutex::new(VecDeque::new()),
            protect_oom: AtomicBool::new(false),
            force_evicted: AtomicBool::new(false),
            last_scheduled: AtomicUsize::new(0),
            total_executed_op: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.read().clone()
    }

    pub(crate) fn set_handle(&self, handle: &str) {
        *self.handle.write() = handle.to_string();
    }

    pub(crate) fn offer(&self) -> OfferId {
        self.offer
    }

    // ---- incoming queue (producers) ----

    pub(crate) fn enqueue(&self, op: OpItem) {
        self.main.lock().queue.push_back(op);
    }

    /// Move everything produced since the last iteration into the backing
    /// queue. Scheduler thread only.
    pub(crate) fn splice_into_backing(&self) {
        let mut incoming = {
            let mut main = self.main.lock();
            std::mem::take(&mut main.queue)
        };
        if !incoming.is_empty() {
            self.backing.lock().append(&mut incoming);
        }
    }

    // ---- backing queue (scheduler thread and policy) ----

    pub fn pop_backing(&self) -> Option<OpItem> {
        self.backing.lock().pop_front()
    }

    pub fn push_backing_front(&self, op: OpItem) {
        self.backing.lock().push_front(op);
    }

    pub fn backing_len(&self) -> usize {
        self.backing.lock().len()
    }

    /// Cancel and drop every pending operation. Scheduler thread only, on
    /// force-evicted sessions.
    pub(crate) fn cancel_backing(&self) {
        let pending = std::mem::take(&mut *self.backing.lock());
        if !pending.is_empty() {
            debug!(
                "Cancelling {} pending operations in evicted session {}",
                pending.len(),
                self.handle()
            );
        }
        for op in pending {
            op.task.cancel();
        }
    }

    // ---- paging callbacks ----

    pub(crate) fn set_paging_callbacks(&self, callbacks: PagingCallbacks) {
        self.main.lock().paging_cb = Some(Arc::new(callbacks));
    }

    pub(crate) fn paging_callbacks(&self) -> Option<Arc<PagingCallbacks>> {
        self.main.lock().paging_cb.clone()
    }

    // ---- deletion ----

    pub(crate) fn prepare_delete(&self, cb: Box<dyn FnOnce() + Send>) {
        self.main.lock().delete_cb = Some(cb);
    }

    // ---- resource accounting ----

    pub fn resource_usage(&self, tag: ResourceTag) -> Quantity {
        self.main.lock().usage.get(tag)
    }

    pub(crate) fn add_usage(&self, res: &Resources) {
        self.main.lock().usage.merge(res);
    }

    pub(crate) fn sub_usage(&self, tag: ResourceTag, qty: Quantity) {
        self.main.lock().usage.sub(tag, qty);
    }

    pub(crate) fn track_ticket(&self, ticket: Ticket) {
        self.tickets.lock().insert(ticket);
    }

    /// A scope commit landed under this ticket; make sure it is tracked
    pub(crate) fn notify_memory_allocation(&self, ticket: Ticket) {
        if self.tickets.lock().insert(ticket) {
            trace!("Session {} now holds {}", self.handle(), ticket);
        }
    }

    pub(crate) fn remove_ticket(&self, ticket: Ticket) {
        if self.tickets.lock().remove(&ticket) {
            trace!("Session {} released {}", self.handle(), ticket);
        }
    }

    pub(crate) fn tickets_snapshot(&self) -> HashSet<Ticket, RandomState> {
        self.tickets.lock().clone()
    }

    // ---- scheduler flags and counters ----

    pub fn protect_oom(&self) -> bool {
        self.protect_oom.load(Ordering::SeqCst)
    }

    pub(crate) fn set_protect_oom(&self, value: bool) {
        self.protect_oom.store(value, Ordering::SeqCst);
    }

    pub fn force_evicted(&self) -> bool {
        self.force_evicted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_force_evicted(&self) {
        self.force_evicted.store(true, Ordering::SeqCst);
    }

    pub fn last_scheduled(&self) -> usize {
        self.last_scheduled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_scheduled(&self, count: usize) {
        self.last_scheduled.store(count, Ordering::Relaxed);
    }

    pub fn total_executed_op(&self) -> u64 {
        self.total_executed_op.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_executed(&self) {
        self.total_executed_op.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SessionItem {
    fn drop(&mut self) {
        if let Some(cb) = self.main.get_mut().delete_cb.take() {
            cb();
        }
        self.tracker.free(self.offer);
        debug!("Session {} destroyed", self.handle.get_mut());
    }
}
