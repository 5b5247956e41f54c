/*!
 * Notification
 * Level-triggered wakeup primitive for the scheduler thread
 *
 * A notify that arrives while no thread is waiting is latched, so the next
 * wait returns immediately. Spurious wakeups are absorbed by the latch.
 */

use parking_lot::{Condvar, Mutex};

pub struct Notification {
    pending: Mutex<bool>,
    signal: Condvar,
}

impl Notification {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Latch the notification and wake all waiters
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.signal.notify_all();
    }

    /// Block until notified; consumes the latch
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.signal.wait(&mut pending);
        }
        *pending = false;
    }
}

impl Default for Notification {
    fn default() -> Self {
        Self::new()
    }
}
