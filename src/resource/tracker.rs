/*!
 * Session Resource Tracker
 *
 * Global admission control. Each prospective session declares a predicted
 * resource map; the tracker grants an offer iff the aggregate of all
 * outstanding offers stays within the configured capacity. Offers are
 * redeemed into session handles on acceptance and released on teardown.
 */

use crate::core::types::{Resources, SessionHandle};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token for a granted admission offer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OfferId(u64);

impl OfferId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "offer#{}", self.0)
    }
}

struct OfferEntry {
    resources: Resources,
    handle: Option<SessionHandle>,
}

struct Budget {
    capacity: Resources,
    admitted: Resources,
}

pub struct SessionResourceTracker {
    budget: Mutex<Budget>,
    offers: DashMap<OfferId, OfferEntry, RandomState>,
    next_offer: AtomicU64,
}

impl SessionResourceTracker {
    pub fn with_capacity(capacity: Resources) -> Self {
        Self {
            budget: Mutex::new(Budget {
                capacity,
                admitted: Resources::new(),
            }),
            offers: DashMap::with_hasher(RandomState::new()),
            next_offer: AtomicU64::new(0),
        }
    }

    /// Speculatively reserve `req` against the global budget
    pub fn admit(&self, req: &Resources) -> Option<OfferId> {
        {
            let mut budget = self.budget.lock();
            let mut predicted = budget.admitted.clone();
            predicted.merge(req);
            if !predicted.fits_in(&budget.capacity) {
                warn!(
                    "Admission rejected: predicted {} exceeds capacity {}",
                    predicted, budget.capacity
                );
                return None;
            }
            budget.admitted = predicted;
        }

        let id = OfferId(self.next_offer.fetch_add(1, Ordering::Relaxed) + 1);
        self.offers.insert(
            id,
            OfferEntry {
                resources: req.clone(),
                handle: None,
            },
        );
        debug!("Admitted {} as {}", req, id);
        Some(id)
    }

    /// Bind a granted offer to the client's session handle
    pub fn accept_admission(&self, offer: OfferId, handle: &str) -> bool {
        match self.offers.get_mut(&offer) {
            Some(mut entry) => {
                entry.handle = Some(handle.to_string());
                debug!("{} accepted by session {}", offer, handle);
                true
            }
            None => false,
        }
    }

    /// Release an offer's reservation on session teardown
    pub fn free(&self, offer: OfferId) {
        if let Some((_, entry)) = self.offers.remove(&offer) {
            self.budget.lock().admitted.remove_all(&entry.resources);
            debug!("{} released ({})", offer, entry.resources);
        }
    }

    /// Predicted usage associated with an outstanding offer
    pub fn usage(&self, offer: OfferId) -> Option<Resources> {
        self.offers.get(&offer).map(|entry| entry.resources.clone())
    }

    /// Aggregate predicted usage across all outstanding offers
    pub fn predicted_usage(&self) -> Resources {
        self.budget.lock().admitted.clone()
    }

    pub fn debug_string(&self) -> String {
        let budget = self.budget.lock();
        format!(
            "admitted: {} capacity: {} offers: {}",
            budget.admitted,
            budget.capacity,
            self.offers.len()
        )
    }
}
