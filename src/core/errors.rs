/*!
 * Error Types
 * Centralized error handling with thiserror and serde support
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-level errors surfaced to clients
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Session admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Unknown scheduler policy: {0}")]
    UnknownScheduler(String),

    #[error("Scheduler already running")]
    SchedulerRunning,
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;
