//! Module resolution
//!
//! Maps module names to factories. Modules are compiled in rather than
//! discovered on disk, so "resolving an entry point" means looking up the
//! factory registered for the name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::module::traits::{Module, ModuleError};
use crate::runtime::Runtime;

/// Constructs a fresh module instance. The runtime handle it receives
/// carries no loading context; modules keep a clone if their capabilities
/// need runtime access after load.
pub type ModuleFactory = Arc<dyn Fn(Runtime) -> Arc<dyn Module> + Send + Sync>;

/// Name → factory registry.
#[derive(Clone, Default)]
pub struct ModuleResolver {
    factories: Arc<Mutex<HashMap<String, ModuleFactory>>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    /// Already-loaded instances are unaffected.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(Runtime) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.lock().insert(name.to_string(), Arc::new(factory));
    }

    /// Resolve the factory for `name`.
    pub fn resolve(&self, name: &str) -> Result<ModuleFactory, ModuleError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))
    }

    /// Names with a registered factory.
    pub fn known(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ModuleFactory>> {
        self.factories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
