/*!
 * Worker Pool
 *
 * Bounded executor for prepared operations. Submission is non-blocking:
 * `try_run` either accepts a job or hands it straight back, and the
 * scheduler uses the returned job as back-pressure. At most `capacity`
 * jobs are queued or running at any moment.
 */

use crossbeam_queue::SegQueue;
use log::info;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send>;

struct PoolShared {
    jobs: SegQueue<Job>,
    capacity: usize,
    in_flight: AtomicUsize,
    gate: Mutex<()>,
    signal: Condvar,
    shutdown: AtomicBool,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let capacity = size.max(1);
        let shared = Arc::new(PoolShared {
            jobs: SegQueue::new(),
            capacity,
            in_flight: AtomicUsize::new(0),
            gate: Mutex::new(()),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..capacity)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(shared))
            })
            .collect();

        info!("Worker pool started with {} threads", capacity);
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Accept the job, or return it when every worker slot is taken
    pub fn try_run(&self, job: Job) -> Option<Job> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Some(job);
        }

        let reserved = self
            .shared
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.shared.capacity).then_some(current + 1)
            });
        if reserved.is_err() {
            return Some(job);
        }

        self.shared.jobs.push(job);
        // Pairs submission with the workers' check-then-wait
        drop(self.shared.gate.lock());
        self.shared.signal.notify_one();
        None
    }

    /// Stop accepting work, drain queued jobs, and join the workers. Safe
    /// to call from any thread, including a worker's own completion path.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _gate = self.shared.gate.lock();
            self.shared.signal.notify_all();
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // A worker thread unwinding the last engine reference must not
            // join itself
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        if let Some(job) = shared.jobs.pop() {
            job();
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            continue;
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let mut gate = shared.gate.lock();
        if shared.jobs.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
            shared
                .signal
                .wait_for(&mut gate, Duration::from_millis(50));
        }
    }
}
