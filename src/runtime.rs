//! Runtime composition root
//!
//! Wires the task queue, durable store, event bus and module lifecycle
//! manager together behind one cheaply-clonable handle. This is the handle
//! modules receive in their hooks and keep for later capability calls.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::config::RuntimeConfig;
use crate::module::manager::{ModuleManager, ShutdownOutcome};
use crate::module::resolver::ModuleResolver;
use crate::module::traits::{Module, ModuleError, ModuleState};
use crate::queue::TaskQueue;
use crate::store::DurableStore;

struct RuntimeInner {
    config: RuntimeConfig,
    queue: TaskQueue,
    store: DurableStore,
    bus: EventBus,
    manager: ModuleManager,
}

/// Shared runtime handle.
///
/// Clones share all state. The handle additionally carries the loading
/// chain — the stack of module names whose load hooks are currently
/// executing on this call path — which is how a dependency cycle is told
/// apart from an unrelated concurrent load.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    chain: Arc<[String]>,
}

impl Runtime {
    /// Build a runtime from `config`. No global state is touched; signal
    /// wiring is a separate, explicit step
    /// ([`install_shutdown_hooks`](crate::utils::install_shutdown_hooks)).
    pub fn new(config: RuntimeConfig) -> Self {
        let queue = TaskQueue::new();
        let store = DurableStore::new(config.data_dir.clone(), queue.clone());
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                queue,
                store,
                bus: EventBus::new(),
                manager: ModuleManager::new(ModuleResolver::new()),
            }),
            chain: Arc::from(Vec::new()),
        }
    }

    /// Register a module factory under `name`.
    pub fn register_module<F>(&self, name: &str, factory: F)
    where
        F: Fn(Runtime) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.inner.manager.register(name, factory);
    }

    /// Load the module registered under `name`.
    pub async fn load(&self, name: &str) -> Result<(), ModuleError> {
        self.inner.manager.load(self, name).await
    }

    /// Unload the module registered under `name`.
    pub async fn unload(&self, name: &str) -> Result<(), ModuleError> {
        self.inner.manager.unload(self, name).await
    }

    /// Unload (if loaded) then load `name`.
    pub async fn reload(&self, name: &str) -> Result<(), ModuleError> {
        self.inner.manager.reload(self, name).await
    }

    /// Unload every loaded module, collecting failures instead of aborting
    /// on the first one.
    pub async fn unload_all(&self) -> Vec<(String, ModuleError)> {
        self.inner.manager.unload_all(self).await
    }

    /// Race full cleanup against `timeout`; see
    /// [`ModuleManager::shutdown`].
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        self.inner.manager.shutdown(self, timeout).await
    }

    /// Clean up (bounded by `timeout`) and terminate the process with
    /// `code`.
    pub async fn exit(&self, code: i32, timeout: Duration) {
        self.inner.manager.exit(self, code, timeout).await
    }

    /// Typed handle to a loaded module.
    pub fn get<M: Module>(&self, name: &str) -> Result<Arc<M>, ModuleError> {
        self.inner.manager.get(name)
    }

    /// Names of all loaded modules.
    pub fn list(&self) -> Vec<String> {
        self.inner.manager.list()
    }

    /// Lifecycle state of `name`.
    pub fn state(&self, name: &str) -> ModuleState {
        self.inner.manager.state(name)
    }

    /// The runtime's task queue.
    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    /// The runtime's durable store.
    pub fn store(&self) -> &DurableStore {
        &self.inner.store
    }

    /// The runtime's event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The module names whose load hooks are executing on this call path.
    pub(crate) fn loading_chain(&self) -> &[String] {
        &self.chain
    }

    /// Handle for invoking `name`'s hooks: same runtime, chain extended
    /// with `name`.
    pub(crate) fn with_chain(&self, name: &str) -> Runtime {
        let mut chain: Vec<String> = self.chain.to_vec();
        chain.push(name.to_string());
        Runtime {
            inner: Arc::clone(&self.inner),
            chain: chain.into(),
        }
    }

    /// Handle with no loading context, for modules to keep beyond their
    /// load hook.
    pub(crate) fn detached(&self) -> Runtime {
        Runtime {
            inner: Arc::clone(&self.inner),
            chain: Arc::from(Vec::new()),
        }
    }
}
