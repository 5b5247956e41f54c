/*!
 * Scheduler Types
 * Per-iteration session change tracking
 */

use crate::session::item::SessionItem;
use std::ops::Range;
use std::sync::Arc;

/// Sessions that came and went since the previous scheduler iteration. The
/// added sessions are identified by their index range in the master list;
/// deleted sessions are held by reference until the policy has seen them,
/// then released.
pub struct SessionChangeSet {
    pub deleted: Vec<Arc<SessionItem>>,
    pub num_added: usize,
    pub added_range: Range<usize>,
}

impl SessionChangeSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SessionChangeSet {
    fn default() -> Self {
        Self {
            deleted: Vec::new(),
            num_added: 0,
            added_range: 0..0,
        }
    }
}
