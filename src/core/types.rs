/*!
 * Core Types
 * Devices, resource tags, quantity maps, and allocation tickets
 */

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Client-supplied session handle
pub type SessionHandle = String;

/// Resource quantity (bytes for memory)
pub type Quantity = u64;

/// Device class
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Gpu,
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Cpu => write!(f, "CPU"),
        }
    }
}

/// A concrete device: class plus index
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: u32,
}

impl DeviceSpec {
    pub const GPU0: DeviceSpec = DeviceSpec::new(DeviceKind::Gpu, 0);
    pub const CPU0: DeviceSpec = DeviceSpec::new(DeviceKind::Cpu, 0);

    pub const fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.index)
    }
}

/// Accounted resource kind. Only `Memory` participates in paging.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Compute,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "MEMORY"),
            ResourceKind::Compute => write!(f, "COMPUTE"),
        }
    }
}

/// The unit of accounting: a resource kind on a specific device
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ResourceTag {
    pub kind: ResourceKind,
    pub device: DeviceSpec,
}

impl ResourceTag {
    pub const fn new(kind: ResourceKind, device: DeviceSpec) -> Self {
        Self { kind, device }
    }

    pub const fn memory(device: DeviceSpec) -> Self {
        Self::new(ResourceKind::Memory, device)
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.device)
    }
}

/// Element-wise map from resource tag to quantity. A missing tag means zero;
/// entries that reach zero are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    entries: HashMap<ResourceTag, Quantity, RandomState>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry map
    pub fn of(tag: ResourceTag, qty: Quantity) -> Self {
        let mut res = Self::new();
        res.set(tag, qty);
        res
    }

    pub fn get(&self, tag: ResourceTag) -> Quantity {
        self.entries.get(&tag).copied().unwrap_or(0)
    }

    pub fn set(&mut self, tag: ResourceTag, qty: Quantity) {
        if qty == 0 {
            self.entries.remove(&tag);
        } else {
            self.entries.insert(tag, qty);
        }
    }

    pub fn add(&mut self, tag: ResourceTag, qty: Quantity) {
        self.set(tag, self.get(tag).saturating_add(qty));
    }

    /// Subtract up to `qty` from `tag`; returns the quantity actually removed.
    pub fn sub(&mut self, tag: ResourceTag, qty: Quantity) -> Quantity {
        let current = self.get(tag);
        let removed = current.min(qty);
        self.set(tag, current - removed);
        removed
    }

    /// Element-wise addition
    pub fn merge(&mut self, other: &Resources) {
        for (tag, qty) in other.iter() {
            self.add(*tag, *qty);
        }
    }

    /// Element-wise saturating subtraction
    pub fn remove_all(&mut self, other: &Resources) {
        for (tag, qty) in other.iter() {
            self.sub(*tag, *qty);
        }
    }

    /// True iff every entry fits within `budget`
    pub fn fits_in(&self, budget: &Resources) -> bool {
        self.iter().all(|(tag, qty)| *qty <= budget.get(*tag))
    }

    /// Per-tag shortfall of `available` against this request
    pub fn missing_from(&self, available: &Resources) -> Resources {
        let mut missing = Resources::new();
        for (tag, qty) in self.iter() {
            let avail = available.get(*tag);
            if *qty > avail {
                missing.set(*tag, *qty - avail);
            }
        }
        missing
    }

    /// Total quantity across all devices for one resource kind
    pub fn kind_total(&self, kind: ResourceKind) -> Quantity {
        self.iter()
            .filter(|(tag, _)| tag.kind == kind)
            .map(|(_, qty)| *qty)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceTag, &Quantity)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ResourceTag, Quantity)> for Resources {
    fn from_iter<I: IntoIterator<Item = (ResourceTag, Quantity)>>(iter: I) -> Self {
        let mut res = Resources::new();
        for (tag, qty) in iter {
            res.add(tag, qty);
        }
        res
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Sorted for stable log output
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by_key(|(tag, _)| **tag);
        write!(f, "{{")?;
        for (i, (tag, qty)) in entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", tag, qty)?;
        }
        write!(f, "}}")
    }
}

/// Reservation identifier issued by the resource monitor. Zero is invalid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ticket(u64);

impl Ticket {
    pub const INVALID: Ticket = Ticket(0);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ticket#{}", self.0)
        } else {
            write!(f, "ticket#invalid")
        }
    }
}
