//! Built-in modules shipped with the runtime.

pub mod event_log;

pub use event_log::EventLog;
