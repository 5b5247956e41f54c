/*!
 * Execution Engine
 *
 * The coordinating component: admits sessions under the global resource
 * budget, accepts streams of operations per session, dispatches them to the
 * worker pool from a dedicated scheduler thread, and reclaims device memory
 * through cooperative paging or forced eviction when a device runs out.
 */

mod context;
mod paging;
mod sched_loop;
mod submit;

pub use context::ExecutionContext;

use crate::core::errors::{EngineError, EngineResult};
use crate::core::limits::DEFAULT_WORKER_THREADS;
use crate::core::sync::Notification;
use crate::core::types::{DeviceSpec, Resources};
use crate::resource::context::ResourceContext;
use crate::resource::monitor::ResourceMonitor;
use crate::resource::tracker::SessionResourceTracker;
use crate::resource::traits::{CapacityProbe, StaticCapacityProbe};
use crate::sched::registry::SchedulerRegistry;
use crate::session::item::{OpItem, SessionItem};
use crate::worker::WorkerPool;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Engine configuration. `scheduler_name` selects a policy from the
/// registry; registration must happen before the scheduler starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler_name: String,
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "fifo".to_string(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) monitor: Arc<ResourceMonitor>,
    pub(crate) tracker: Arc<SessionResourceTracker>,
    pub(crate) probe: Box<dyn CapacityProbe>,
    pub(crate) pool: WorkerPool,

    pub(crate) new_sessions: Mutex<Vec<Arc<SessionItem>>>,
    pub(crate) deleted_sessions: Mutex<Vec<Arc<SessionItem>>>,
    pub(crate) has_work: Notification,
    pub(crate) should_exit: AtomicBool,

    pub(crate) running_tasks: AtomicUsize,
    pub(crate) no_paging_running_tasks: AtomicUsize,
}

impl EngineShared {
    pub(crate) fn insert_session(&self, item: Arc<SessionItem>) {
        self.new_sessions.lock().push(item);
        self.has_work.notify();
    }

    pub(crate) fn remove_session(&self, item: Arc<SessionItem>) {
        self.deleted_sessions.lock().push(item);
        self.has_work.notify();
    }

    pub(crate) fn push_to_session_queue(&self, op: OpItem) {
        let Some(session) = op.session() else {
            // Session already deleted; discard the task silently
            return;
        };
        session.enqueue(op);
        self.has_work.notify();
    }

    pub(crate) fn make_resource_context(
        &self,
        session: Arc<SessionItem>,
        spec: DeviceSpec,
        res: &Resources,
        missing: &mut Resources,
    ) -> ResourceContext {
        let mut rctx = ResourceContext::new(session, Arc::clone(&self.monitor));
        if !rctx.initialize_staging(spec, res, missing) {
            debug!("Resource allocation failed; requested {}", res);
            // Rendered outside the log call so the monitor lock is not held
            // while the logger runs
            let state = self.monitor.debug_string();
            debug!("Available: {}", state);
        }
        rctx
    }
}

/// Cloneable handle bound to a running engine, given to scheduler policies
/// so they can stage reservations and submit prepared operations.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Stage `res` on `spec` for an upcoming operation of `session`
    pub fn make_resource_context(
        &self,
        session: Arc<SessionItem>,
        spec: DeviceSpec,
        res: &Resources,
        missing: &mut Resources,
    ) -> ResourceContext {
        self.shared.make_resource_context(session, spec, res, missing)
    }

    /// Hand a prepared operation to the worker pool. Returns the operation
    /// back when the pool is saturated or the submission was rejected into
    /// the queue; None means it was accepted (or silently discarded because
    /// its session expired).
    pub fn submit(&self, op: OpItem) -> Option<OpItem> {
        self.shared.submit_task(op)
    }
}

pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
    sched_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_probe(config, Box::new(StaticCapacityProbe::default()))
    }

    pub fn with_probe(config: EngineConfig, probe: Box<dyn CapacityProbe>) -> Self {
        let capacities = probe.device_capacities();
        let tracker = Arc::new(SessionResourceTracker::with_capacity(capacities));
        let pool = WorkerPool::new(config.worker_threads);
        info!(
            "Execution engine initialized: policy '{}', {} workers",
            config.scheduler_name, config.worker_threads
        );
        Self {
            shared: Arc::new(EngineShared {
                config,
                monitor: Arc::new(ResourceMonitor::new()),
                tracker,
                probe,
                pool,
                new_sessions: Mutex::new(Vec::new()),
                deleted_sessions: Mutex::new(Vec::new()),
                has_work: Notification::new(),
                should_exit: AtomicBool::new(false),
                running_tasks: AtomicUsize::new(0),
                no_paging_running_tasks: AtomicUsize::new(0),
            }),
            sched_thread: Mutex::new(None),
        }
    }

    /// Spawn the scheduler thread. The configured policy is resolved here;
    /// an unknown name is an error.
    pub fn start_scheduler(&self) -> EngineResult<()> {
        let mut slot = self.sched_thread.lock();
        if slot.is_some() {
            return Err(EngineError::SchedulerRunning);
        }

        let name = self.shared.config.scheduler_name.clone();
        let policy = SchedulerRegistry::global()
            .create(
                &name,
                EngineHandle {
                    shared: Arc::clone(&self.shared),
                },
            )
            .ok_or(EngineError::UnknownScheduler(name))?;

        self.shared.should_exit.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        *slot = Some(thread::spawn(move || {
            sched_loop::SchedulerLoop::new(shared, policy).run();
        }));
        Ok(())
    }

    /// Stop and join the scheduler thread, then drop any sessions still
    /// pending admission or deletion
    pub fn stop_scheduler(&self) {
        let Some(handle) = self.sched_thread.lock().take() else {
            return;
        };
        self.shared.should_exit.store(true, Ordering::SeqCst);
        self.shared.has_work.notify();
        let _ = handle.join();

        // Has to happen after the scheduler thread exits
        self.shared.new_sessions.lock().clear();
        self.shared.deleted_sessions.lock().clear();
        info!("Scheduler stopped");
    }

    /// Ask admission control for a new session with the given predicted
    /// resource map
    pub fn create_session_offer(&self, resources: Resources) -> EngineResult<ExecutionContext> {
        match self.shared.tracker.admit(&resources) {
            Some(offer) => {
                let item = Arc::new(SessionItem::new(Arc::clone(&self.shared.tracker), offer));
                Ok(ExecutionContext::new(Arc::clone(&self.shared), item))
            }
            None => {
                warn!(
                    "Rejecting session due to unsafe resource usage. Predicted: {}, current: {}",
                    resources,
                    self.shared.tracker.debug_string()
                );
                Err(EngineError::AdmissionRejected(format!(
                    "predicted usage {} exceeds the safe footprint",
                    resources
                )))
            }
        }
    }

    /// Operations currently handed to workers
    pub fn running_tasks(&self) -> usize {
        self.shared.running_tasks.load(Ordering::SeqCst)
    }

    /// Synchronous operations currently handed to workers; asynchronous
    /// ones are excluded so their in-flight state cannot suppress OOM
    /// detection
    pub fn no_paging_running_tasks(&self) -> usize {
        self.shared.no_paging_running_tasks.load(Ordering::SeqCst)
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        self.stop_scheduler();
        // Join the workers here while this is definitely not a worker
        // thread; a late engine reference unwinding inside the pool would
        // otherwise have to join itself
        self.shared.pool.shutdown();
    }
}
