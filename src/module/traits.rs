//! Module contract and lifecycle types
//!
//! Defines the trait every module implements and the error taxonomy the
//! lifecycle manager reports.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::Runtime;
use crate::store::StoreError;

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Not registered (includes a module whose load failed)
    Unloaded,
    /// The load hook is running
    Loading,
    /// Registered and available to lookups
    Loaded,
    /// The unload hook is running
    Unloading,
}

/// Lifecycle phase a hook error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Load,
    Unload,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Load => write!(f, "load"),
            HookPhase::Unload => write!(f, "unload"),
        }
    }
}

/// Module system errors
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// No factory is registered under the requested name.
    #[error("module not found: {0}")]
    NotFound(String),

    /// The module is not currently loaded.
    #[error("module {0} is not loaded")]
    NotLoaded(String),

    /// A module's own load/unload hook failed.
    #[error("module {module} {phase} hook failed: {message}")]
    Hook {
        module: String,
        phase: HookPhase,
        message: String,
    },

    /// Typed lookup found the module but under a different concrete type.
    #[error("module {module} does not expose the requested capability type")]
    WrongType { module: String },

    /// Module operation failed for some other reason.
    #[error("module operation failed: {0}")]
    Operation(String),
}

impl ModuleError {
    pub(crate) fn hook(module: &str, phase: HookPhase, err: impl fmt::Display) -> Self {
        ModuleError::Hook {
            module: module.to_string(),
            phase,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ModuleError {
    fn from(e: StoreError) -> Self {
        ModuleError::Operation(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::Operation(e.to_string())
    }
}

/// Trait every module implements.
///
/// A module's concrete type is its capability surface: once loaded, other
/// modules fetch a typed handle with [`Runtime::get`] and call whatever
/// inherent methods the type exposes.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Called when the module is loaded.
    ///
    /// May load other modules through `rt`; a dependency that is already
    /// loaded, or whose load is what (transitively) triggered this hook,
    /// is a no-op. A failure here leaves the module unregistered — any
    /// side effects the hook already performed are the module's own
    /// responsibility to keep idempotent.
    async fn load(&self, rt: &Runtime) -> Result<(), ModuleError>;

    /// Called when the module is unloaded.
    ///
    /// The module is removed from the registry whether or not this hook
    /// succeeds; a failure is reported to the caller.
    async fn unload(&self, rt: &Runtime) -> Result<(), ModuleError>;

    /// Typed-handle support for [`Runtime::get`]. Implementations return
    /// `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
