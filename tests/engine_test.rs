/*!
 * Execution Engine Tests
 * End-to-end scheduling behavior over a live engine
 */

mod common;

use ai_os_exec::EngineError;
use common::{gpu_mem, start_engine, wait_until, EventLog, TestTask};
use pretty_assertions::assert_eq;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_single_session_runs_ops_in_order() {
    // One worker serializes execution so observed order is dispatch order
    let engine = start_engine(1000, 1000, 1);
    let events = EventLog::new();

    let ctx = engine.create_session_offer(gpu_mem(100)).unwrap();
    ctx.accept_offer("sess-a");
    assert_eq!(ctx.session_handle(), "sess-a");
    assert_eq!(ctx.offered_session_resource(), Some(gpu_mem(100)));

    ctx.enqueue_operation(TestTask::new("a", 40, &events).boxed());
    ctx.enqueue_operation(TestTask::new("b", 40, &events).boxed());

    assert!(events.wait_for("done:a", WAIT));
    assert!(events.wait_for("done:b", WAIT));

    // FIFO per session: a began before b
    assert!(events.index_of("run:a").unwrap() < events.index_of("run:b").unwrap());
    assert_eq!(events.count("done:a"), 1);
    assert_eq!(events.count("done:b"), 1);
    assert_eq!(events.count("cancel:a"), 0);

    assert!(wait_until(WAIT, || engine.running_tasks() == 0));
    assert!(wait_until(WAIT, || ctx.total_executed_op() == 2));
}

#[test]
fn test_worker_pool_saturation_defers_dispatch() {
    let engine = start_engine(1000, 1000, 1);
    let events = EventLog::new();

    let ctx = engine.create_session_offer(gpu_mem(200)).unwrap();
    ctx.accept_offer("sess-sat");

    ctx.enqueue_operation(
        TestTask::new("slow", 10, &events)
            .delay(Duration::from_millis(200))
            .boxed(),
    );
    ctx.enqueue_operation(TestTask::new("b", 10, &events).boxed());
    ctx.enqueue_operation(TestTask::new("c", 10, &events).boxed());

    // With one worker, only the slow op is in flight
    assert!(events.wait_for("run:slow", WAIT));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(events.count("run:b"), 0);
    assert_eq!(events.count("run:c"), 0);

    // Back-pressure released once the slow op completes
    assert!(events.wait_for("done:c", WAIT));
    let order = events.snapshot();
    let pos = |e: &str| order.iter().position(|x| x == e).unwrap();
    assert!(pos("done:slow") < pos("run:b"));
    assert!(pos("run:b") < pos("run:c"));
}

#[test]
fn test_admission_rejected_over_budget() {
    let engine = start_engine(100, 1000, 2);

    let ctx = engine.create_session_offer(gpu_mem(80)).unwrap();
    ctx.accept_offer("sess-big");

    let rejected = engine.create_session_offer(gpu_mem(30));
    assert!(matches!(rejected, Err(EngineError::AdmissionRejected(_))));

    // Rejection left no engine state behind
    let accepted = engine.create_session_offer(gpu_mem(20));
    assert!(accepted.is_ok());
}

#[test]
fn test_oom_retry_with_protection() {
    let engine = start_engine(1000, 1000, 4);
    let events = EventLog::new();

    // Two live sessions switch OOM protection on
    let ctx = engine.create_session_offer(gpu_mem(100)).unwrap();
    ctx.accept_offer("sess-work");
    let bystander = engine.create_session_offer(gpu_mem(100)).unwrap();
    bystander.accept_offer("sess-bystander");
    std::thread::sleep(Duration::from_millis(100));

    ctx.enqueue_operation(TestTask::new("flaky", 40, &events).fail_mem_once().boxed());

    assert!(events.wait_for("memfail-retried:flaky", WAIT));
    assert!(events.wait_for("done:flaky", WAIT));
    assert_eq!(events.count("run:flaky"), 2);
    assert_eq!(events.count("done:flaky"), 1);
}

#[test]
fn test_oom_failure_surfaces_without_protection() {
    let engine = start_engine(1000, 1000, 4);
    let events = EventLog::new();

    // A single session gets no OOM protection
    let ctx = engine.create_session_offer(gpu_mem(100)).unwrap();
    ctx.accept_offer("sess-solo");
    std::thread::sleep(Duration::from_millis(100));

    ctx.enqueue_operation(TestTask::new("flaky", 40, &events).fail_mem_once().boxed());

    assert!(events.wait_for("memfail-fatal:flaky", WAIT));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(events.count("run:flaky"), 1);
    assert_eq!(events.count("done:flaky"), 0);
    assert!(wait_until(WAIT, || engine.running_tasks() == 0));
}

#[test]
fn test_session_deletion_mid_flight() {
    let engine = start_engine(1000, 1000, 1);
    let events = EventLog::new();

    let ctx = engine.create_session_offer(gpu_mem(100)).unwrap();
    ctx.accept_offer("sess-del");

    ctx.enqueue_operation(
        TestTask::new("a", 10, &events)
            .delay(Duration::from_millis(300))
            .boxed(),
    );
    ctx.enqueue_operation(TestTask::new("b", 10, &events).boxed());

    assert!(events.wait_for("run:a", WAIT));
    let del_events = std::sync::Arc::clone(&events);
    ctx.delete_session(move || del_events.record("deleted"));

    // The in-flight op completes normally; the queued one is discarded
    assert!(events.wait_for("done:a", WAIT));
    assert!(events.wait_for("deleted", WAIT));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(events.count("run:b"), 0);
}

#[test]
fn test_shutdown_with_pending_work() {
    let engine = start_engine(100, 1000, 2);
    let events = EventLog::new();

    let ctx = engine.create_session_offer(gpu_mem(100)).unwrap();
    ctx.accept_offer("sess-stuck");
    // Can never be scheduled: footprint exceeds device capacity, and a
    // single session has nobody to page
    ctx.enqueue_operation(TestTask::new("stuck", 200, &events).boxed());

    std::thread::sleep(Duration::from_millis(100));
    engine.stop_scheduler();

    assert_eq!(events.count("run:stuck"), 0);
    assert_eq!(events.count("cancel:stuck"), 0);
}

#[test]
fn test_unknown_scheduler_name() {
    let engine = ai_os_exec::ExecutionEngine::new(ai_os_exec::EngineConfig {
        scheduler_name: "lottery".to_string(),
        ..Default::default()
    });
    assert!(matches!(
        engine.start_scheduler(),
        Err(EngineError::UnknownScheduler(_))
    ));
}
