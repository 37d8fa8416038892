//! Loaded-module registry
//!
//! Tracks each named module's slot: either an in-flight load (with a watch
//! channel concurrent callers can await) or a fully loaded instance. A name
//! resolves to an instance only once its load hook has succeeded; lookups
//! never see a partially constructed module.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::module::traits::{Module, ModuleError, ModuleState};

/// Outcome of an in-flight load, broadcast to awaiting callers.
/// `None` until the load finishes.
pub(crate) type LoadOutcome = Option<Result<(), ModuleError>>;

enum Slot {
    Loading(watch::Receiver<LoadOutcome>),
    Loaded(Arc<dyn Module>),
    Unloading(Arc<dyn Module>),
}

/// Result of claiming a name for loading.
pub(crate) enum BeginLoad {
    /// Already fully loaded; the load is a no-op.
    AlreadyLoaded,
    /// Another load is in flight; await its outcome on this receiver.
    InFlight(watch::Receiver<LoadOutcome>),
    /// The name was claimed; the caller runs the load and reports the
    /// outcome through this sender.
    Started(watch::Sender<LoadOutcome>),
}

#[derive(Default)]
pub(crate) struct ModuleRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `name` for loading, or report what stands in the
    /// way.
    pub fn begin_load(&self, name: &str) -> BeginLoad {
        let mut slots = self.lock();
        match slots.get(name) {
            Some(Slot::Loaded(_)) | Some(Slot::Unloading(_)) => BeginLoad::AlreadyLoaded,
            Some(Slot::Loading(rx)) => BeginLoad::InFlight(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                slots.insert(name.to_string(), Slot::Loading(rx));
                BeginLoad::Started(tx)
            }
        }
    }

    /// Flip `name` from `Loading` to `Loaded`. Call before notifying
    /// awaiting callers, so they find the instance registered.
    pub fn complete_load(&self, name: &str, module: Arc<dyn Module>) {
        self.lock().insert(name.to_string(), Slot::Loaded(module));
    }

    /// Drop the `Loading` slot after a failed load; the name is free for a
    /// retry.
    pub fn fail_load(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Flip `name` from `Loaded` to `Unloading` and hand back the instance
    /// so its unload hook can run.
    pub fn begin_unload(&self, name: &str) -> Result<Arc<dyn Module>, ModuleError> {
        let mut slots = self.lock();
        match slots.get(name) {
            Some(Slot::Loaded(module)) => {
                let module = Arc::clone(module);
                slots.insert(name.to_string(), Slot::Unloading(Arc::clone(&module)));
                Ok(module)
            }
            _ => Err(ModuleError::NotLoaded(name.to_string())),
        }
    }

    /// Remove `name` entirely (after its unload hook ran, whatever the
    /// outcome).
    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    /// The instance registered under `name`, if fully loaded.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        match self.lock().get(name) {
            Some(Slot::Loaded(module)) => Some(Arc::clone(module)),
            _ => None,
        }
    }

    /// Names of all fully loaded modules.
    pub fn list(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Loaded(_) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Lifecycle state of `name`.
    pub fn state(&self, name: &str) -> ModuleState {
        match self.lock().get(name) {
            None => ModuleState::Unloaded,
            Some(Slot::Loading(_)) => ModuleState::Loading,
            Some(Slot::Loaded(_)) => ModuleState::Loaded,
            Some(Slot::Unloading(_)) => ModuleState::Unloading,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
