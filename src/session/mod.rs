/*!
 * Session Module
 * Per-session state, queued operations, and the paging protocol
 */

pub mod item;

pub use item::{OpItem, OperationItem, PagingCallbacks, SessionItem};
