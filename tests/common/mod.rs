/*!
 * Shared test harness: a scriptable operation task, an event log, and
 * polling helpers for the asynchronous scheduler.
 */

// Not every test binary uses every helper
#![allow(dead_code)]

use ai_os_exec::{
    DeviceSpec, EngineConfig, ExecutionEngine, OperationTask, Quantity, ResourceContext,
    ResourceKind, ResourceTag, Resources, StaticCapacityProbe, TaskCallbacks,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

static LOG_INIT: Once = Once::new();

pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Start an engine over fixed GPU0/CPU0 memory capacities
pub fn start_engine(gpu_mem: u64, cpu_mem: u64, workers: usize) -> ExecutionEngine {
    init_logging();
    let capacities: Resources = [
        (ResourceTag::memory(DeviceSpec::GPU0), gpu_mem),
        (ResourceTag::memory(DeviceSpec::CPU0), cpu_mem),
    ]
    .into_iter()
    .collect();
    let engine = ExecutionEngine::with_probe(
        EngineConfig {
            worker_threads: workers,
            ..Default::default()
        },
        Box::new(StaticCapacityProbe::new(capacities)),
    );
    engine.start_scheduler().expect("scheduler failed to start");
    engine
}

pub fn gpu_mem(bytes: u64) -> Resources {
    Resources::of(ResourceTag::memory(DeviceSpec::GPU0), bytes)
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: impl Into<String>) {
        self.entries.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.snapshot().iter().filter(|e| *e == event).count()
    }

    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| e == event)
    }

    pub fn wait_for(&self, event: &str, timeout: Duration) -> bool {
        wait_until(timeout, || self.count(event) > 0)
    }
}

/// Published (context, committed bytes) pairs, shared with paging callbacks
pub type ContextRegistry = Arc<Mutex<Vec<(Arc<ResourceContext>, Quantity)>>>;

/// Scriptable operation: declares a memory footprint, optionally commits
/// it, optionally fails with OOM once, optionally runs slowly. Everything
/// it does lands in the event log as `<verb>:<label>`.
pub struct TestTask {
    label: String,
    device: DeviceSpec,
    bytes: Quantity,
    run_delay: Duration,
    commit: bool,
    fail_mem_once: AtomicBool,
    ctx: Mutex<Option<Arc<ResourceContext>>>,
    share_contexts: Option<ContextRegistry>,
    events: Arc<EventLog>,
}

impl TestTask {
    pub fn new(label: &str, bytes: Quantity, events: &Arc<EventLog>) -> Self {
        Self {
            label: label.to_string(),
            device: DeviceSpec::GPU0,
            bytes,
            run_delay: Duration::ZERO,
            commit: false,
            fail_mem_once: AtomicBool::new(false),
            ctx: Mutex::new(None),
            share_contexts: None,
            events: Arc::clone(events),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Commit the whole staged footprint, so it outlives the run
    pub fn commit(mut self) -> Self {
        self.commit = true;
        self
    }

    pub fn fail_mem_once(self) -> Self {
        self.fail_mem_once.store(true, Ordering::SeqCst);
        self
    }

    /// Publish the task's resource context for paging callbacks to find
    pub fn share_context(mut self, registry: &ContextRegistry) -> Self {
        self.share_contexts = Some(Arc::clone(registry));
        self
    }

    pub fn boxed(self) -> Box<dyn OperationTask> {
        Box::new(self)
    }
}

impl OperationTask for TestTask {
    fn prepare(&self) -> Option<DeviceSpec> {
        Some(self.device)
    }

    fn estimated_usage(&self, device: DeviceSpec) -> Resources {
        Resources::of(ResourceTag::memory(device), self.bytes)
    }

    fn set_resource_context(&self, ctx: Arc<ResourceContext>) {
        *self.ctx.lock().unwrap() = Some(ctx);
    }

    fn resource_context(&self) -> Option<Arc<ResourceContext>> {
        self.ctx.lock().unwrap().clone()
    }

    fn run(&self, callbacks: TaskCallbacks) {
        self.events.record(format!("run:{}", self.label));
        if !self.run_delay.is_zero() {
            thread::sleep(self.run_delay);
        }

        if self.fail_mem_once.swap(false, Ordering::SeqCst) {
            self.events.record(format!("memfail:{}", self.label));
            let retried = (callbacks.mem_failure)();
            let outcome = if retried { "retried" } else { "fatal" };
            self.events.record(format!("memfail-{}:{}", outcome, self.label));
            return;
        }

        if self.commit {
            let ctx = self.ctx.lock().unwrap().clone();
            if let Some(ctx) = ctx {
                let scope = ctx.alloc(ResourceKind::Memory);
                assert!(scope.is_valid(), "staged allocation vanished");
                scope.commit();
                if let Some(registry) = &self.share_contexts {
                    registry.lock().unwrap().push((ctx, self.bytes));
                }
            }
        }

        self.events.record(format!("done:{}", self.label));
        (callbacks.done)();
    }

    fn cancel(&self) {
        self.events.record(format!("cancel:{}", self.label));
    }

    fn debug_string(&self) -> String {
        self.label.clone()
    }
}
