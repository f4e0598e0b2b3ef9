//! Task execution — the per-task stage loop.
//!
//! Drives one task through every live stage in pipeline order, invoking
//! the hooked plugins by descending priority. A failing plugin is logged
//! and skipped; only the cooperative abort signal stops a task early,
//! and then the `abort` hook still gets its turn.

use crate::failures::FailureLog;
use crate::pipeline::EventPipeline;
use crate::registry::PluginRegistry;
use crate::task::{Task, TaskState};

/// Runs tasks against a loaded registry and a sealed pipeline.
pub struct TaskExecutor<'a> {
    registry: &'a PluginRegistry,
    pipeline: &'a EventPipeline,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(registry: &'a PluginRegistry, pipeline: &'a EventPipeline) -> Self {
        TaskExecutor { registry, pipeline }
    }

    /// Runs every sequential stage for one task, then flushes whatever
    /// the task marked failed into the failure ledger.
    pub async fn execute(&self, task: &mut Task) {
        task.set_state(TaskState::Running);
        tracing::info!(task = %task.name, "Executing task");

        for event in self.pipeline.ordered_events() {
            if task.aborted() {
                break;
            }
            if event == "download" && task.options().learning() {
                tracing::info!(task = %task.name, "Learn mode, download stage skipped");
                continue;
            }
            self.run_event(event, task, true).await;
        }

        if task.aborted() {
            tracing::warn!(
                task = %task.name,
                reason = task.abort_reason().unwrap_or("unknown"),
                "Task aborted"
            );
            self.run_event("abort", task, false).await;
            task.set_state(TaskState::Aborted);
        } else {
            task.set_state(TaskState::Done);
        }
        task.set_current_event(None);

        let failures = FailureLog::new(task.session().clone());
        for entry in task.failed().to_vec() {
            if let Err(err) = failures.record(&entry.title, &entry.url).await {
                tracing::error!(
                    task = %task.name,
                    entry = %entry.title,
                    error = %err,
                    "Could not record failure"
                );
            }
        }

        tracing::info!(
            task = %task.name,
            accepted = task.accepted().len(),
            rejected = task.rejected().len(),
            failed = task.failed().len(),
            undecided = task.entries().len(),
            "Task finished"
        );
    }

    /// Runs the `terminate` hook for a task that completed normally.
    /// Aborted tasks are skipped.
    pub async fn terminate(&self, task: &mut Task) {
        if task.aborted() {
            tracing::debug!(task = %task.name, "Skipping terminate for aborted task");
            return;
        }
        self.run_event("terminate", task, false).await;
    }

    /// Invokes every plugin hooked into `event`, highest priority first.
    /// `stop_on_abort` is off for the `abort` and `terminate` passes,
    /// which run even on a task that has already aborted.
    async fn run_event(&self, event: &str, task: &mut Task, stop_on_abort: bool) {
        task.set_current_event(Some(event.to_string()));
        let plugins = match self.registry.plugins_for_event(event, self.pipeline) {
            Ok(plugins) => plugins,
            Err(err) => {
                tracing::error!(task = %task.name, event = %event, error = %err, "Plugin lookup failed");
                return;
            }
        };
        for record in plugins {
            if stop_on_abort && task.aborted() {
                return;
            }
            tracing::debug!(task = %task.name, plugin = %record.name, event = %event, "Running plugin");
            if let Err(err) = record.instance.on_event(event, task).await {
                tracing::error!(
                    task = %task.name,
                    plugin = %record.name,
                    event = %event,
                    error = %err,
                    "Plugin failed, continuing with the rest"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use sluice_types::{Entry, Result, SluiceError};

    use crate::handler::EventHandler;
    use crate::loader::Registrar;
    use crate::runner::RunOptions;
    use crate::session::SessionStore;

    // Records the order hooks fire in, shared across plugin instances.
    type CallLog = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        hooks: Vec<&'static str>,
        log: CallLog,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn handled_events(&self) -> Vec<&str> {
            self.hooks.clone()
        }

        fn register(&self, _reg: &mut Registrar<'_>) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, event: &str, _task: &mut Task) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
            Ok(())
        }
    }

    struct Failing {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Failing {
        fn handled_events(&self) -> Vec<&str> {
            vec!["filter"]
        }

        fn register(&self, _reg: &mut Registrar<'_>) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, _event: &str, _task: &mut Task) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SluiceError::plugin("flaky", "boom"))
        }
    }

    struct Aborter;

    #[async_trait]
    impl EventHandler for Aborter {
        fn handled_events(&self) -> Vec<&str> {
            vec!["input"]
        }

        fn register(&self, _reg: &mut Registrar<'_>) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, _event: &str, task: &mut Task) -> Result<()> {
            task.abort("nothing to do");
            Ok(())
        }
    }

    async fn bare_task(options: RunOptions) -> Task {
        let session = SessionStore::open_volatile("unused.json", false)
            .await
            .unwrap();
        Task::new(
            "demo",
            serde_json::Map::new(),
            serde_json::Map::new(),
            session,
            options,
        )
    }

    fn register_recorder(
        registry: &mut PluginRegistry,
        pipeline: &EventPipeline,
        name: &'static str,
        hooks: Vec<&'static str>,
        metadata: serde_json::Value,
        log: &CallLog,
    ) {
        registry
            .register(
                name,
                Arc::new(Recorder {
                    name,
                    hooks,
                    log: log.clone(),
                }),
                metadata.as_object().cloned().unwrap(),
                pipeline,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn stages_run_in_order_and_priorities_within_a_stage() {
        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        register_recorder(&mut registry, &pipeline, "early", vec!["filter"], json!({"filter_priority": 255}), &log);
        register_recorder(&mut registry, &pipeline, "mid", vec!["filter"], json!({}), &log);
        register_recorder(&mut registry, &pipeline, "input_side", vec!["input"], json!({}), &log);

        let executor = TaskExecutor::new(&registry, &pipeline);
        let mut task = bare_task(RunOptions::default()).await;
        executor.execute(&mut task).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["input_side:input", "early:filter", "mid:filter"]
        );
        assert_eq!(task.state(), TaskState::Done);
    }

    #[tokio::test]
    async fn one_failing_plugin_does_not_stop_the_stage() {
        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        registry
            .register(
                "flaky",
                Arc::new(Failing { calls: calls.clone() }),
                serde_json::Map::new(),
                &pipeline,
            )
            .unwrap();
        register_recorder(&mut registry, &pipeline, "steady", vec!["filter", "exit"], json!({}), &log);

        let executor = TaskExecutor::new(&registry, &pipeline);
        let mut task = bare_task(RunOptions::default()).await;
        executor.execute(&mut task).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["steady:filter", "steady:exit"]
        );
        assert_eq!(task.state(), TaskState::Done);
    }

    #[tokio::test]
    async fn abort_skips_later_stages_and_runs_the_abort_hook() {
        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        registry
            .register("quitter", Arc::new(Aborter), serde_json::Map::new(), &pipeline)
            .unwrap();
        register_recorder(&mut registry, &pipeline, "late", vec!["filter", "output", "abort"], json!({}), &log);

        let executor = TaskExecutor::new(&registry, &pipeline);
        let mut task = bare_task(RunOptions::default()).await;
        executor.execute(&mut task).await;

        assert_eq!(task.state(), TaskState::Aborted);
        assert_eq!(task.abort_reason(), Some("nothing to do"));
        // Only the abort hook fired, no filter or output.
        assert_eq!(*log.lock().unwrap(), vec!["late:abort"]);
    }

    #[tokio::test]
    async fn terminate_runs_for_done_tasks_and_skips_aborted_ones() {
        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        register_recorder(&mut registry, &pipeline, "cleaner", vec!["terminate"], json!({}), &log);

        let executor = TaskExecutor::new(&registry, &pipeline);
        let mut done = bare_task(RunOptions::default()).await;
        executor.execute(&mut done).await;
        executor.terminate(&mut done).await;
        assert_eq!(*log.lock().unwrap(), vec!["cleaner:terminate"]);

        log.lock().unwrap().clear();
        let mut aborted = bare_task(RunOptions::default()).await;
        aborted.abort("pre-aborted");
        executor.execute(&mut aborted).await;
        executor.terminate(&mut aborted).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn learn_mode_skips_the_download_stage() {
        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        register_recorder(&mut registry, &pipeline, "fetcher", vec!["download", "exit"], json!({}), &log);

        let executor = TaskExecutor::new(&registry, &pipeline);
        let mut task = bare_task(RunOptions {
            learn: true,
            ..RunOptions::default()
        })
        .await;
        executor.execute(&mut task).await;

        assert_eq!(*log.lock().unwrap(), vec!["fetcher:exit"]);
    }

    #[tokio::test]
    async fn failed_entries_land_in_the_ledger() {
        struct FailOne;

        #[async_trait]
        impl EventHandler for FailOne {
            fn handled_events(&self) -> Vec<&str> {
                vec!["input", "download"]
            }

            fn register(&self, _reg: &mut Registrar<'_>) -> Result<()> {
                Ok(())
            }

            async fn on_event(&self, event: &str, task: &mut Task) -> Result<()> {
                match event {
                    "input" => {
                        task.add_entry(Entry::new("doomed", "http://x/doomed"));
                        task.accept("doomed");
                    }
                    "download" => {
                        task.fail("doomed", "connection refused");
                    }
                    _ => {}
                }
                Ok(())
            }
        }

        let pipeline = EventPipeline::new();
        let mut registry = PluginRegistry::new();
        registry
            .register("failer", Arc::new(FailOne), serde_json::Map::new(), &pipeline)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let session = SessionStore::open(dir.path().join("session-t.json"), false)
            .await
            .unwrap();
        let mut task = Task::new(
            "demo",
            serde_json::Map::new(),
            serde_json::Map::new(),
            session.clone(),
            RunOptions::default(),
        );

        let executor = TaskExecutor::new(&registry, &pipeline);
        executor.execute(&mut task).await;

        let records = FailureLog::new(session).list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "doomed");
        assert_eq!(records[0].url, "http://x/doomed");
    }
}
