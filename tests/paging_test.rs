/*!
 * Paging Coordinator Tests
 * OOM-driven memory reclamation: volunteer paging, forced eviction, and
 * the victim traversal order hook
 */

mod common;

use ai_os_exec::{
    DeviceSpec, EngineHandle, FifoPolicy, PagingCallbacks, ResourceKind, SchedulerPolicy,
    SchedulerRegistry, SessionChangeSet, SessionItem, Ticket, VictimOrder,
};
use common::{gpu_mem, start_engine, wait_until, ContextRegistry, EventLog, TestTask};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// A volunteer that pages out the victim ticket by deallocating its
/// committed memory through the published resource context
fn paging_volunteer(
    label: &'static str,
    registry: &ContextRegistry,
    events: &Arc<EventLog>,
) -> PagingCallbacks {
    let volunteer_registry = Arc::clone(registry);
    let volunteer_events = Arc::clone(events);
    let evict_events = Arc::clone(events);
    PagingCallbacks {
        volunteer: Box::new(move |ticket: Ticket, _dst| {
            let contexts = volunteer_registry.lock().unwrap();
            let Some((ctx, bytes)) = contexts.iter().find(|(c, _)| c.ticket() == ticket) else {
                return 0;
            };
            ctx.dealloc(ResourceKind::Memory, *bytes);
            volunteer_events.record(format!("volunteer:{}", label));
            *bytes
        }),
        force_evicted: Box::new(move || evict_events.record(format!("evicted:{}", label))),
    }
}

/// Callbacks that never volunteer but observe forced eviction
fn evict_observer(label: &'static str, events: &Arc<EventLog>) -> PagingCallbacks {
    let events = Arc::clone(events);
    PagingCallbacks {
        volunteer: Box::new(|_, _| 0),
        force_evicted: Box::new(move || events.record(format!("evicted:{}", label))),
    }
}

#[test]
fn test_force_evict_when_no_volunteer() {
    // GPU capacity 100; sessions predict 50 each
    let engine = start_engine(100, 1000, 2);
    let events = EventLog::new();

    let big = engine.create_session_offer(gpu_mem(50)).unwrap();
    big.accept_offer("sess-big");
    let small = engine.create_session_offer(gpu_mem(50)).unwrap();
    small.accept_offer("sess-small");

    // sess-big pins 80 bytes of committed memory and registers no callbacks
    big.enqueue_operation(TestTask::new("pin", 80, &events).commit().boxed());
    assert!(events.wait_for("done:pin", WAIT));

    // sess-small can be notified but holds no tickets to volunteer
    small.register_paging_callbacks(evict_observer("small", &events));

    // Needs 40, only 20 free: no progress, paging, eviction of sess-small
    small.enqueue_operation(TestTask::new("q", 40, &events).boxed());

    assert!(events.wait_for("evicted:small", WAIT));
    assert!(events.wait_for("cancel:q", WAIT));
    assert_eq!(events.count("run:q"), 0);
    assert_eq!(events.count("evicted:big"), 0);
}

#[test]
fn test_volunteer_paging_releases_memory() {
    let engine = start_engine(100, 1000, 2);
    let events = EventLog::new();
    let registry: ContextRegistry = Arc::new(Mutex::new(Vec::new()));

    let owner = engine.create_session_offer(gpu_mem(40)).unwrap();
    owner.accept_offer("sess-owner");
    let donor = engine.create_session_offer(gpu_mem(40)).unwrap();
    donor.accept_offer("sess-donor");
    let newcomer = engine.create_session_offer(gpu_mem(20)).unwrap();
    newcomer.accept_offer("sess-new");

    // Largest consumer: 50 committed. Will be skipped by the coordinator.
    owner.enqueue_operation(TestTask::new("own", 50, &events).commit().boxed());
    assert!(events.wait_for("done:own", WAIT));

    // Donor: 30 committed, published for its volunteer callback
    donor.enqueue_operation(
        TestTask::new("donate", 30, &events)
            .commit()
            .share_context(&registry)
            .boxed(),
    );
    assert!(events.wait_for("done:donate", WAIT));
    donor.register_paging_callbacks(paging_volunteer("donor", &registry, &events));

    // 80 committed of 100: a 40-byte op cannot stage until paging frees 30
    newcomer.enqueue_operation(TestTask::new("r", 40, &events).boxed());

    assert!(events.wait_for("volunteer:donor", WAIT));
    assert!(events.wait_for("done:r", WAIT));
    assert_eq!(events.count("evicted:donor"), 0);
    assert_eq!(events.count("cancel:r"), 0);
}

/// FIFO scheduling with the opposite paging traversal order
struct SmallestFirstFifo(FifoPolicy);

impl SchedulerPolicy for SmallestFirstFifo {
    fn notify_pre_scheduling_iteration(
        &mut self,
        sessions: &[Arc<SessionItem>],
        change: &SessionChangeSet,
        candidates: &mut Vec<Arc<SessionItem>>,
    ) {
        self.0
            .notify_pre_scheduling_iteration(sessions, change, candidates);
    }

    fn maybe_schedule_from(&mut self, session: &Arc<SessionItem>) -> (usize, bool) {
        self.0.maybe_schedule_from(session)
    }

    fn insufficient_memory(&self, device: DeviceSpec) -> bool {
        self.0.insufficient_memory(device)
    }

    fn victim_order(&self) -> VictimOrder {
        VictimOrder::SmallestFirst
    }

    fn debug_string(&self, session: &Arc<SessionItem>) -> String {
        self.0.debug_string(session)
    }
}

static REGISTER: Once = Once::new();

fn register_smallest_first() {
    REGISTER.call_once(|| {
        SchedulerRegistry::global().register(
            "fifo-smallest",
            Box::new(|engine: EngineHandle| Box::new(SmallestFirstFifo(FifoPolicy::new(engine)))),
        );
    });
}

#[test]
fn test_smallest_first_victim_order() {
    register_smallest_first();

    let capacities: ai_os_exec::Resources = [
        (ai_os_exec::ResourceTag::memory(DeviceSpec::GPU0), 100u64),
        (ai_os_exec::ResourceTag::memory(DeviceSpec::CPU0), 1000u64),
    ]
    .into_iter()
    .collect();
    let engine = ai_os_exec::ExecutionEngine::with_probe(
        ai_os_exec::EngineConfig {
            scheduler_name: "fifo-smallest".to_string(),
            worker_threads: 2,
        },
        Box::new(ai_os_exec::StaticCapacityProbe::new(capacities)),
    );
    engine.start_scheduler().unwrap();

    let events = EventLog::new();
    let registry: ContextRegistry = Arc::new(Mutex::new(Vec::new()));

    let s1 = engine.create_session_offer(gpu_mem(25)).unwrap();
    s1.accept_offer("s1");
    let s2 = engine.create_session_offer(gpu_mem(25)).unwrap();
    s2.accept_offer("s2");
    let s3 = engine.create_session_offer(gpu_mem(25)).unwrap();
    s3.accept_offer("s3");
    let s4 = engine.create_session_offer(gpu_mem(25)).unwrap();
    s4.accept_offer("s4");

    // Usage ranking: s1 (60) > s2 (30) > s3 (10)
    s1.enqueue_operation(TestTask::new("p1", 60, &events).commit().boxed());
    assert!(events.wait_for("done:p1", WAIT));
    s2.enqueue_operation(
        TestTask::new("p2", 30, &events)
            .commit()
            .share_context(&registry)
            .boxed(),
    );
    assert!(events.wait_for("done:p2", WAIT));
    s3.enqueue_operation(
        TestTask::new("p3", 10, &events)
            .commit()
            .share_context(&registry)
            .boxed(),
    );
    assert!(events.wait_for("done:p3", WAIT));

    s2.register_paging_callbacks(paging_volunteer("s2", &registry, &events));
    s3.register_paging_callbacks(paging_volunteer("s3", &registry, &events));

    // 100 committed; a 30-byte op forces paging. Smallest-first visits s3
    // (10 bytes, not enough) before s2 (30 bytes, enough).
    s4.enqueue_operation(TestTask::new("r", 30, &events).boxed());

    assert!(events.wait_for("done:r", WAIT));
    let order = events.snapshot();
    let s3_idx = order.iter().position(|e| e == "volunteer:s3").unwrap();
    let s2_idx = order.iter().position(|e| e == "volunteer:s2").unwrap();
    assert!(s3_idx < s2_idx);
    assert_eq!(events.count("evicted:s2"), 0);
    assert_eq!(events.count("evicted:s3"), 0);

    assert!(wait_until(WAIT, || engine.running_tasks() == 0));
}
