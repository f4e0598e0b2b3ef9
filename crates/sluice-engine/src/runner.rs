//! Run orchestration: task selection, execution, the terminate pass, and
//! end-of-run persistence.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sluice_types::{value_kind, Result};

use crate::executor::TaskExecutor;
use crate::loader::{LoadReport, PluginLoader};
use crate::pipeline::EventPipeline;
use crate::registry::PluginRegistry;
use crate::session::SessionStore;
use crate::task::{Task, TaskState};

// ---------------------------------------------------------------------------
// Configuration and options
// ---------------------------------------------------------------------------

/// Root configuration: named tasks plus the global `settings` section.
/// Tasks run in name order; a name starting with `_` is disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tasks: BTreeMap<String, Value>,
    #[serde(default)]
    pub settings: serde_json::Map<String, Value>,
}

/// Modes chosen outside the engine, honored everywhere inside it.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Dry run: volatile session, nothing durable happens.
    pub test: bool,
    /// Skip downloading, still let plugins mark items processed.
    pub learn: bool,
    /// The session was recreated empty this run.
    pub reset: bool,
    /// Load and check configuration only; no execution, no terminate.
    pub validate_only: bool,
    /// Run only the task with this name (case-insensitive).
    pub task: Option<String>,
    /// Where to write the debug dump after the run, if requested.
    pub dump: Option<PathBuf>,
    /// Advisory: plugins with caches should bypass them.
    pub no_cache: bool,
    /// Values of the flags plugins added through the registrar.
    pub plugin_flags: HashMap<String, bool>,
}

impl RunOptions {
    /// Learn semantics apply when asked for directly or implied by a
    /// reset: a recreated session has everything to relearn.
    pub fn learning(&self) -> bool {
        self.learn || self.reset
    }

    pub fn plugin_flag(&self, name: &str) -> bool {
        self.plugin_flags.get(name).copied().unwrap_or(false)
    }
}

/// Totals across one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub aborted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Owns the loaded registry and the sealed pipeline, and drives runs
/// against them.
pub struct Runner {
    registry: PluginRegistry,
    pipeline: EventPipeline,
    report: LoadReport,
}

impl Runner {
    /// Runs the loader once and captures its outcome. Everything a
    /// process ever executes goes through the registry and pipeline
    /// built here.
    pub fn load(loader: &PluginLoader) -> Result<Self> {
        let mut registry = PluginRegistry::new();
        let mut pipeline = EventPipeline::new();
        let report = loader.load(&mut registry, &mut pipeline)?;
        Ok(Runner {
            registry,
            pipeline,
            report,
        })
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// Executes one full run: version gate, task selection, the per-task
    /// stage loop, the terminate pass, and session persistence.
    pub async fn run(
        &self,
        config: &Config,
        session: &SessionStore,
        options: &RunOptions,
    ) -> Result<RunSummary> {
        session.version_check(options.learning()).await?;

        let mut tasks = self.select_tasks(config, session, options);
        if let Some(ref wanted) = options.task {
            if tasks.is_empty() {
                tracing::warn!(task = %wanted, "No runnable task with that name");
            }
        }

        let executor = TaskExecutor::new(&self.registry, &self.pipeline);
        let mut summary = RunSummary::default();
        if options.validate_only {
            tracing::info!(
                tasks = tasks.len(),
                "Configuration checked, execution skipped"
            );
        } else {
            for task in tasks.iter_mut() {
                executor.execute(task).await;
                summary.executed += 1;
                if task.state() == TaskState::Aborted {
                    summary.aborted += 1;
                }
                summary.accepted += task.accepted().len();
                summary.rejected += task.rejected().len();
                summary.failed += task.failed().len();
            }
            for task in tasks.iter_mut() {
                executor.terminate(task).await;
            }
        }

        if options.test {
            tracing::info!("Test run, session not saved");
        } else {
            // A dump is a diagnostic extra; it must never cost the run
            // its learned state.
            if let Some(ref path) = options.dump {
                if let Err(err) = session.dump_debug_snapshot(path).await {
                    tracing::error!(
                        path = %path.display(),
                        error = %err,
                        "Debug dump failed, saving the session anyway"
                    );
                }
            }
            session.close().await?;
        }
        Ok(summary)
    }

    /// Builds a `Task` for every runnable configured task, logging a
    /// diagnostic for each one whose configuration has the wrong shape.
    fn select_tasks(
        &self,
        config: &Config,
        session: &SessionStore,
        options: &RunOptions,
    ) -> Vec<Task> {
        let mut tasks = Vec::new();
        for (name, value) in &config.tasks {
            if name.starts_with('_') {
                tracing::debug!(task = %name, "Task is disabled, skipping");
                continue;
            }
            if let Some(ref wanted) = options.task {
                if !name.eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            let Some(map) = value.as_object() else {
                self.diagnose_shape(name, value);
                continue;
            };
            tasks.push(Task::new(
                name.clone(),
                map.clone(),
                config.settings.clone(),
                session.clone(),
                options.clone(),
            ));
        }
        tasks
    }

    fn diagnose_shape(&self, name: &str, value: &Value) {
        if let Some(text) = value.as_str() {
            if self.registry.contains(text) {
                tracing::error!(
                    task = %name,
                    plugin = %text,
                    "Task configuration is a bare plugin name, its options probably sit one nesting level too high"
                );
                return;
            }
        }
        tracing::error!(
            task = %name,
            kind = value_kind(value),
            "Task configuration is not a map, skipping"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
