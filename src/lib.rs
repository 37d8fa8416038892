//! Module Runtime - process-local module lifecycle, queueing and persistence
//!
//! This crate provides a process-local runtime in which independently
//! developed modules are loaded, unloaded and reloaded at runtime,
//! communicate through a shared event bus, and persist state to disk
//! without corrupting each other's writes.
//!
//! ## Architecture
//!
//! Three mechanisms form the concurrency/consistency core:
//!
//! 1. **TaskQueue** ([`queue`]): keyed FIFO execution — at most one
//!    in-flight task per key, strict submission order, full concurrency
//!    across keys. The system's only concurrency-control primitive.
//! 2. **DurableStore** ([`store`]): cached, dirty-tracked, one-YAML-file-
//!    per-key persistence, with every mutation and save serialized through
//!    the queue under the record's key.
//! 3. **Module lifecycle** ([`module`]): load/unload/reload orchestration
//!    with re-entrancy-safe loading, failure-isolating batch unload, and a
//!    deadline-bounded shutdown race.
//!
//! ## Design Principles
//!
//! 1. **Per-key confinement**: all mutation of a record happens on its
//!    queue worker, so no additional locking is needed.
//! 2. **Failure isolation**: one task's (or one module's) failure never
//!    takes down its siblings.
//! 3. **Bounded shutdown**: a misbehaving unload hook cannot hang the
//!    process past the configured deadline.
//! 4. **Explicit globals**: signal handlers are installed by one explicit
//!    call from the entry point, never as construction side effects.

pub mod bus;
pub mod config;
pub mod module;
pub mod modules;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod utils;

pub use bus::{Event, EventBus};
pub use config::{ConfigError, LoggingConfig, RuntimeConfig};
pub use module::{
    HookPhase, Module, ModuleError, ModuleFactory, ModuleManager, ModuleState, ShutdownOutcome,
};
pub use queue::{QueueError, TaskHandle, TaskQueue};
pub use runtime::Runtime;
pub use store::{DurableStore, StoreError};
