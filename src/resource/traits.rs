/*!
 * Capacity Probes
 * Platform sources of per-device resource capacities
 */

use crate::core::limits::{DEFAULT_CPU_MEMORY, DEFAULT_GPU_MEMORY};
use crate::core::types::{DeviceSpec, ResourceTag, Resources};

/// Supplies the declared capacity of every accounted device. Implemented
/// outside the core by platform adapters; the engine consults it once at
/// scheduler startup.
pub trait CapacityProbe: Send + Sync {
    fn device_capacities(&self) -> Resources;
}

/// Fixed capacities, for embedders and tests
pub struct StaticCapacityProbe {
    capacities: Resources,
}

impl StaticCapacityProbe {
    pub fn new(capacities: Resources) -> Self {
        Self { capacities }
    }
}

impl Default for StaticCapacityProbe {
    fn default() -> Self {
        let capacities = [
            (ResourceTag::memory(DeviceSpec::GPU0), DEFAULT_GPU_MEMORY),
            (ResourceTag::memory(DeviceSpec::CPU0), DEFAULT_CPU_MEMORY),
        ]
        .into_iter()
        .collect();
        Self::new(capacities)
    }
}

impl CapacityProbe for StaticCapacityProbe {
    fn device_capacities(&self) -> Resources {
        self.capacities.clone()
    }
}
