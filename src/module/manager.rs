//! Module lifecycle manager
//!
//! Orchestrates loading, unloading, reloading and shutdown of modules.
//! Loading is idempotent and safe against both concurrent duplicate loads
//! (the second caller awaits the first's outcome) and dependency cycles
//! (a load for a name already on the caller's loading chain is a no-op).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::module::registry::{BeginLoad, ModuleRegistry};
use crate::module::resolver::ModuleResolver;
use crate::module::traits::{HookPhase, Module, ModuleError, ModuleState};
use crate::runtime::Runtime;

/// How a shutdown race ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Cleanup finished inside the deadline. `failures` counts modules
    /// whose unload hook failed.
    Clean { failures: usize },
    /// The deadline fired first; outstanding cleanup was abandoned.
    TimedOut,
}

/// Module lifecycle manager.
pub struct ModuleManager {
    registry: ModuleRegistry,
    resolver: ModuleResolver,
}

impl ModuleManager {
    pub(crate) fn new(resolver: ModuleResolver) -> Self {
        Self {
            registry: ModuleRegistry::new(),
            resolver,
        }
    }

    /// Register a module factory under `name`.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(Runtime) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.resolver.register(name, factory);
    }

    /// Load the module registered under `name`.
    ///
    /// No-op if already loaded. If a load for `name` is in flight: callers
    /// on that load's own chain (a dependency cycle) return immediately,
    /// anyone else awaits the shared outcome, so two concurrent loads
    /// produce exactly one instantiation.
    pub async fn load(&self, rt: &Runtime, name: &str) -> Result<(), ModuleError> {
        match self.registry.begin_load(name) {
            BeginLoad::AlreadyLoaded => Ok(()),
            BeginLoad::InFlight(mut rx) => {
                if rt.loading_chain().iter().any(|n| n == name) {
                    debug!("Module {} is already loading on this chain", name);
                    return Ok(());
                }
                loop {
                    let outcome = rx.borrow_and_update().clone();
                    if let Some(result) = outcome {
                        return result;
                    }
                    if rx.changed().await.is_err() {
                        return Err(ModuleError::Operation(format!(
                            "load of module {name} was abandoned"
                        )));
                    }
                }
            }
            BeginLoad::Started(tx) => {
                info!("Loading module: {}", name);
                match self.run_load(rt, name).await {
                    Ok(module) => {
                        // Register before waking awaiting callers so they
                        // find the instance in place.
                        self.registry.complete_load(name, module);
                        let _ = tx.send(Some(Ok(())));
                        info!("Module {} loaded", name);
                        Ok(())
                    }
                    Err(e) => {
                        self.registry.fail_load(name);
                        let _ = tx.send(Some(Err(e.clone())));
                        warn!("Failed to load module {}: {}", name, e);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn run_load(&self, rt: &Runtime, name: &str) -> Result<Arc<dyn Module>, ModuleError> {
        let factory = self.resolver.resolve(name)?;
        let hook_rt = rt.with_chain(name);
        let module = factory(hook_rt.detached());
        module
            .load(&hook_rt)
            .await
            .map_err(|e| ModuleError::hook(name, HookPhase::Load, e))?;
        Ok(module)
    }

    /// Unload the module registered under `name`.
    ///
    /// The module leaves the registry whether or not its unload hook
    /// succeeds; a hook failure is reported to the caller.
    pub async fn unload(&self, rt: &Runtime, name: &str) -> Result<(), ModuleError> {
        let module = self.registry.begin_unload(name)?;
        info!("Unloading module: {}", name);

        let result = module.unload(rt).await;
        self.registry.remove(name);

        match result {
            Ok(()) => {
                info!("Module {} unloaded", name);
                Ok(())
            }
            Err(e) => Err(ModuleError::hook(name, HookPhase::Unload, e)),
        }
    }

    /// Unload (if loaded) then load `name`. Not atomic: a failure between
    /// the two leaves the module unloaded.
    pub async fn reload(&self, rt: &Runtime, name: &str) -> Result<(), ModuleError> {
        info!("Reloading module: {}", name);
        match self.unload(rt, name).await {
            Ok(()) | Err(ModuleError::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }
        self.load(rt, name).await
    }

    /// Unload every currently loaded module, attempting all of them even
    /// when some fail. Returns the failures; an empty vector means a clean
    /// sweep.
    pub async fn unload_all(&self, rt: &Runtime) -> Vec<(String, ModuleError)> {
        let names = self.registry.list();
        let results = futures::future::join_all(names.into_iter().map(|name| async move {
            let result = self.unload(rt, &name).await;
            (name, result)
        }))
        .await;

        let mut failures = Vec::new();
        for (name, result) in results {
            if let Err(e) = result {
                warn!("Failed to unload module {}: {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }

    /// Race full cleanup (unload all modules, then flush the store through
    /// its queues) against `timeout`.
    ///
    /// If the deadline fires first the cleanup task is abandoned — left
    /// running, not cancelled — and [`ShutdownOutcome::TimedOut`] is
    /// returned so the caller can terminate regardless.
    pub async fn shutdown(&self, rt: &Runtime, timeout: Duration) -> ShutdownOutcome {
        info!("Shutting down: unloading all modules");
        let rt = rt.clone();
        let cleanup = tokio::spawn(async move {
            let failures = rt.unload_all().await;
            if let Err(e) = rt.store().save_all().await {
                warn!("Failed to flush store during shutdown: {}", e);
            }
            failures.len()
        });

        match tokio::time::timeout(timeout, cleanup).await {
            Ok(Ok(failures)) => {
                info!("Cleanup completed");
                ShutdownOutcome::Clean { failures }
            }
            Ok(Err(e)) => {
                warn!("Cleanup task failed: {}", e);
                ShutdownOutcome::TimedOut
            }
            Err(_) => {
                warn!(
                    "Cleanup timed out after {:?}, abandoning remaining work",
                    timeout
                );
                ShutdownOutcome::TimedOut
            }
        }
    }

    /// [`shutdown`](Self::shutdown), then terminate the process with
    /// `code`. The shutdown deadline bounds how long a misbehaving unload
    /// hook can delay termination.
    pub async fn exit(&self, rt: &Runtime, code: i32, timeout: Duration) {
        self.shutdown(rt, timeout).await;
        info!("bye.");
        std::process::exit(code);
    }

    /// Typed handle to the loaded module registered under `name`.
    pub fn get<M: Module>(&self, name: &str) -> Result<Arc<M>, ModuleError> {
        let module = self
            .registry
            .get(name)
            .ok_or_else(|| ModuleError::NotLoaded(name.to_string()))?;
        module.as_any().downcast::<M>().map_err(|_| ModuleError::WrongType {
            module: name.to_string(),
        })
    }

    /// Names of all loaded modules.
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Lifecycle state of `name`.
    pub fn state(&self, name: &str) -> ModuleState {
        self.registry.state(name)
    }
}
