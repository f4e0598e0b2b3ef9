//! One named task and the entries flowing through it.

use serde_json::Value;

use sluice_types::{Entry, Result};

use crate::merge;
use crate::runner::RunOptions;
use crate::session::SessionStore;

/// Lifecycle of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Done,
    Aborted,
}

/// A named task: its configuration, its entries sorted into outcome
/// lists, and the cooperative abort signal.
///
/// Entries start undecided; plugins move them with
/// [`accept`](Task::accept), [`reject`](Task::reject) and
/// [`fail`](Task::fail). Aborting is a signal, not an error: the
/// executor checks it between plugin invocations.
pub struct Task {
    pub name: String,
    config: serde_json::Map<String, Value>,
    settings: serde_json::Map<String, Value>,
    session: SessionStore,
    options: RunOptions,
    state: TaskState,
    current_event: Option<String>,
    entries: Vec<Entry>,
    accepted: Vec<Entry>,
    rejected: Vec<Entry>,
    failed: Vec<Entry>,
    abort_reason: Option<String>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        config: serde_json::Map<String, Value>,
        settings: serde_json::Map<String, Value>,
        session: SessionStore,
        options: RunOptions,
    ) -> Self {
        Task {
            name: name.into(),
            config,
            settings,
            session,
            options,
            state: TaskState::Created,
            current_event: None,
            entries: Vec::new(),
            accepted: Vec::new(),
            rejected: Vec::new(),
            failed: Vec::new(),
            abort_reason: None,
        }
    }

    // -- configuration ------------------------------------------------------

    /// This task's options for `plugin`, if the task configures it.
    pub fn plugin_config(&self, plugin: &str) -> Option<&Value> {
        self.config.get(plugin)
    }

    /// The whole task configuration map.
    pub fn config(&self) -> &serde_json::Map<String, Value> {
        &self.config
    }

    /// Global `settings.<keyword>` resolved against plugin defaults.
    pub fn settings_for(&self, keyword: &str, defaults: Value) -> Result<Value> {
        merge::settings_for(&self.settings, keyword, defaults)
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    // -- entries ------------------------------------------------------------

    /// Adds a new undecided entry; input plugins call this.
    pub fn add_entry(&mut self, entry: Entry) {
        tracing::debug!(task = %self.name, entry = %entry.title, "Entry added");
        self.entries.push(entry);
    }

    /// Entries nobody has accepted, rejected, or failed yet.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn accepted(&self) -> &[Entry] {
        &self.accepted
    }

    pub fn rejected(&self) -> &[Entry] {
        &self.rejected
    }

    pub fn failed(&self) -> &[Entry] {
        &self.failed
    }

    /// Accepts the undecided entry titled `title`. Returns whether one
    /// was found.
    pub fn accept(&mut self, title: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.title == title) else {
            return false;
        };
        let entry = self.entries.remove(idx);
        tracing::debug!(task = %self.name, entry = %title, "Entry accepted");
        self.accepted.push(entry);
        true
    }

    /// Rejects the undecided entry titled `title`.
    pub fn reject(&mut self, title: &str, reason: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.title == title) else {
            return false;
        };
        let entry = self.entries.remove(idx);
        tracing::debug!(task = %self.name, entry = %title, reason = %reason, "Entry rejected");
        self.rejected.push(entry);
        true
    }

    /// Marks an entry failed, whether it is still undecided or was
    /// already accepted. Failed entries land in the failure ledger when
    /// the task finishes.
    pub fn fail(&mut self, title: &str, reason: &str) -> bool {
        let entry = if let Some(idx) = self.entries.iter().position(|e| e.title == title) {
            self.entries.remove(idx)
        } else if let Some(idx) = self.accepted.iter().position(|e| e.title == title) {
            self.accepted.remove(idx)
        } else {
            return false;
        };
        tracing::warn!(task = %self.name, entry = %title, reason = %reason, "Entry failed");
        self.failed.push(entry);
        true
    }

    // -- abort signal -------------------------------------------------------

    /// Requests a cooperative abort; the executor stops this task before
    /// the next plugin invocation.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.into());
        }
    }

    pub fn aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The stage currently executing, while the executor runs this task.
    pub fn current_event(&self) -> Option<&str> {
        self.current_event.as_deref()
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn set_current_event(&mut self, event: Option<String>) {
        self.current_event = event;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
