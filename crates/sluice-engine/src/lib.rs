//! Sluice's execution engine.
//!
//! Everything that decides what a run *does* lives here: the ordered stage
//! pipeline, the plugin registry and loader, the persistent session store,
//! per-task entry state, and the orchestration that walks tasks through
//! the stages. The CLI crate owns the process surface (flags, logging,
//! exit codes) and drives a [`Runner`] built from a [`PluginLoader`].

pub mod builtin;
pub mod executor;
pub mod failures;
pub mod handler;
pub mod loader;
pub mod merge;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod session;
pub mod task;

pub use executor::TaskExecutor;
pub use failures::{FailureLog, FailureRecord, FAILED_MAX};
pub use handler::EventHandler;
pub use loader::{
    default_loader, CliFlag, LoadReport, PluginLoader, PluginSymbol, PluginUnit, Registrar,
};
pub use merge::{merge_into, settings_for};
pub use pipeline::{Anchor, EventPipeline, Insertion, BUILTIN_EVENTS, VIRTUAL_EVENTS};
pub use registry::{PluginRecord, PluginRegistry, DEFAULT_PRIORITY};
pub use runner::{Config, RunOptions, RunSummary, Runner};
pub use session::{dump_path, session_path, SessionStore, SESSION_VERSION};
pub use task::{Task, TaskState};
