/*!
 * Engine Limits and Constants
 *
 * Centralized location for timing, capacity, and sizing constants.
 * Organized by domain for maintainability and discoverability.
 */

use crate::core::types::DeviceSpec;
use std::time::Duration;

// =============================================================================
// SCHEDULER TIMING
// =============================================================================

/// First back-off sleep after the scheduler stops making progress
pub const SCHED_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Idle time before the scheduler starts backing off at all
pub const SCHED_IDLE_THRESHOLD: Duration = Duration::from_millis(20);

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of operation worker threads
pub const DEFAULT_WORKER_THREADS: usize = 4;

// =============================================================================
// DEFAULT DEVICE CAPACITIES
// =============================================================================

/// Default accelerator memory capacity for the static probe (8GB)
pub const DEFAULT_GPU_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

/// Default host memory capacity for the static probe (32GB)
pub const DEFAULT_CPU_MEMORY: u64 = 32 * 1024 * 1024 * 1024;

// =============================================================================
// PAGING
// =============================================================================

/// Devices checked for memory exhaustion each scheduler iteration
pub const PAGING_SOURCES: &[DeviceSpec] = &[DeviceSpec::GPU0];

/// Fallback device that paged-out allocations migrate to
pub const PAGING_FALLBACK: DeviceSpec = DeviceSpec::CPU0;
