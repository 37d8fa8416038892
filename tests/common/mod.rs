//! Test utilities for runtime tests
//!
//! Provides an isolated runtime fixture and a small bestiary of test
//! modules: counting, failing, hanging and dependency-loading.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use module_runtime::{Module, ModuleError, Runtime, RuntimeConfig};

/// Test fixture with an isolated data directory.
pub struct RuntimeFixture {
    /// Kept alive for the duration of the test; dropped last.
    pub temp_dir: TempDir,
    pub rt: Runtime,
}

impl RuntimeFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = RuntimeConfig {
            data_dir: temp_dir.path().join("data"),
            ..RuntimeConfig::default()
        };
        let rt = Runtime::new(config);
        Self { temp_dir, rt }
    }

    /// Path of a store record's backing file.
    pub fn record_path(&self, key: &str) -> std::path::PathBuf {
        self.temp_dir.path().join("data").join(format!("{key}.yaml"))
    }
}

/// Counters shared between a test and a registered module's factory and
/// hooks.
#[derive(Clone, Default, Debug)]
pub struct ModuleCounters {
    pub instantiated: Arc<AtomicUsize>,
    pub loads: Arc<AtomicUsize>,
    pub unloads: Arc<AtomicUsize>,
}

impl ModuleCounters {
    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

/// Module that counts its hook invocations.
#[derive(Debug)]
pub struct CountingModule {
    counters: ModuleCounters,
    load_delay: Option<Duration>,
}

impl CountingModule {
    /// Capability used by typed-lookup tests.
    pub fn load_count(&self) -> usize {
        self.counters.loads()
    }
}

#[async_trait]
impl Module for CountingModule {
    async fn load(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        self.counters.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub fn register_counting(rt: &Runtime, name: &str) -> ModuleCounters {
    register_counting_with_delay(rt, name, None)
}

pub fn register_counting_with_delay(
    rt: &Runtime,
    name: &str,
    load_delay: Option<Duration>,
) -> ModuleCounters {
    let counters = ModuleCounters::default();
    let shared = counters.clone();
    rt.register_module(name, move |_rt| {
        shared.instantiated.fetch_add(1, Ordering::SeqCst);
        Arc::new(CountingModule {
            counters: shared.clone(),
            load_delay,
        }) as Arc<dyn Module>
    });
    counters
}

/// Module whose hooks fail on demand.
#[derive(Debug)]
pub struct FailingModule {
    fail_load: bool,
    fail_unload: bool,
}

#[async_trait]
impl Module for FailingModule {
    async fn load(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        if self.fail_load {
            return Err(ModuleError::Operation("induced load failure".to_string()));
        }
        Ok(())
    }

    async fn unload(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        if self.fail_unload {
            return Err(ModuleError::Operation("induced unload failure".to_string()));
        }
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub fn register_failing(rt: &Runtime, name: &str, fail_load: bool, fail_unload: bool) {
    rt.register_module(name, move |_rt| {
        Arc::new(FailingModule {
            fail_load,
            fail_unload,
        }) as Arc<dyn Module>
    });
}

/// Module whose unload hook never resolves.
pub struct HangingModule;

#[async_trait]
impl Module for HangingModule {
    async fn load(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn unload(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub fn register_hanging(rt: &Runtime, name: &str) {
    rt.register_module(name, |_rt| Arc::new(HangingModule) as Arc<dyn Module>);
}

/// Module whose load hook loads other modules first.
pub struct DepModule {
    deps: Vec<String>,
}

#[async_trait]
impl Module for DepModule {
    async fn load(&self, rt: &Runtime) -> Result<(), ModuleError> {
        for dep in &self.deps {
            rt.load(dep).await?;
        }
        Ok(())
    }

    async fn unload(&self, _rt: &Runtime) -> Result<(), ModuleError> {
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub fn register_deps(rt: &Runtime, name: &str, deps: &[&str]) {
    let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    rt.register_module(name, move |_rt| {
        Arc::new(DepModule { deps: deps.clone() }) as Arc<dyn Module>
    });
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
