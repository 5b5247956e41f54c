/*!
 * Scheduler Registry
 * String-keyed construction of scheduler policies
 *
 * Policies register a factory under a name; the engine resolves the
 * configured name at scheduler startup. Registration must happen before
 * `start_scheduler`.
 */

use crate::engine::EngineHandle;
use crate::sched::fifo::FifoPolicy;
use crate::sched::traits::SchedulerPolicy;
use ahash::RandomState;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

pub type PolicyFactory = Box<dyn Fn(EngineHandle) -> Box<dyn SchedulerPolicy> + Send + Sync>;

pub struct SchedulerRegistry {
    factories: RwLock<HashMap<String, PolicyFactory, RandomState>>,
}

static REGISTRY: OnceLock<SchedulerRegistry> = OnceLock::new();

impl SchedulerRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Process-wide registry, seeded with the built-in policies
    pub fn global() -> &'static SchedulerRegistry {
        REGISTRY.get_or_init(|| {
            let registry = SchedulerRegistry::new();
            registry.register("fifo", Box::new(|engine| Box::new(FifoPolicy::new(engine))));
            registry
        })
    }

    pub fn register(&self, name: &str, factory: PolicyFactory) {
        let mut factories = self.factories.write();
        if factories.insert(name.to_string(), factory).is_some() {
            warn!("Scheduler policy '{}' re-registered", name);
        } else {
            info!("Scheduler policy '{}' registered", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn create(&self, name: &str, engine: EngineHandle) -> Option<Box<dyn SchedulerPolicy>> {
        let factories = self.factories.read();
        let factory = factories.get(name)?;
        Some(factory(engine))
    }
}
