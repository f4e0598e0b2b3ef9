//! Shared errors and the entry model for the Sluice automation engine.
//!
//! This crate provides the foundational types used across the other Sluice
//! crates:
//! - `SluiceError` — unified error taxonomy
//! - `Entry` — one candidate item flowing through a task

use serde::{Deserialize, Serialize};

/// Unified error type for all Sluice subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SluiceError {
    // === Registry Errors ===
    #[error("Plugin '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("Unknown event '{0}'")]
    UnknownEvent(String),

    // === Pipeline Errors ===
    #[error("Event '{event}' from '{requester}' must anchor to exactly one of before/after")]
    ConflictingAnchors { event: String, requester: String },

    #[error("Event '{0}' already exists in the pipeline")]
    DuplicateEvent(String),

    #[error("Pipeline is sealed, event '{event}' can no longer be added")]
    PipelineSealed { event: String },

    // === Loader Errors ===
    #[error("Registration rejected: {0}")]
    Register(String),

    #[error("Constructing plugin '{plugin}' from unit '{unit}' failed: {message}")]
    Construction {
        unit: String,
        plugin: String,
        message: String,
    },

    // === Session Errors ===
    #[error("Session version {found} is incompatible with {expected}, use --reset to recreate it")]
    IncompatibleSession { found: i64, expected: i64 },

    // === Configuration Errors ===
    #[error("Cannot merge key '{key}': {source_kind} does not combine with {dest_kind}")]
    MergeConflict {
        key: String,
        source_kind: String,
        dest_kind: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Task Errors ===
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Builds a `Plugin` error from a plugin name and message.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        SluiceError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Builds a `Register` error; the loader treats this class as
    /// "skip this plugin", not as a fatal condition.
    pub fn register(message: impl Into<String>) -> Self {
        SluiceError::Register(message.into())
    }

    /// Returns `true` if the error must stop the process before any task
    /// runs (as opposed to being logged and skipped).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SluiceError::Construction { .. }
                | SluiceError::IncompatibleSession { .. }
                | SluiceError::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, SluiceError>`.
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Human-readable name for a JSON value's shape, used in diagnostics.
pub fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "map",
    }
}

// ---------------------------------------------------------------------------
// Entry — one candidate item flowing through a task
// ---------------------------------------------------------------------------

/// A single candidate item produced by an input plugin.
///
/// `title` and `url` are required and form the item's identity for
/// cross-run bookkeeping (seen tracking, the failure ledger). Everything
/// else plugins want to attach travels in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub url: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Entry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Entry {
            title: title.into(),
            url: url.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Returns an extra field, if present.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Sets an extra field, replacing any previous value.
    pub fn set_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Error display ---

    #[test]
    fn duplicate_registration_names_the_plugin() {
        let err = SluiceError::DuplicateRegistration("patterns".into());
        assert!(err.to_string().contains("patterns"));
    }

    #[test]
    fn incompatible_session_reports_both_versions() {
        let err = SluiceError::IncompatibleSession {
            found: 1,
            expected: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn merge_conflict_names_key_and_kinds() {
        let err = SluiceError::MergeConflict {
            key: "quality".into(),
            source_kind: "string".into(),
            dest_kind: "list".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("quality"));
        assert!(msg.contains("string"));
        assert!(msg.contains("list"));
    }

    // --- Classification ---

    #[test]
    fn construction_errors_are_fatal() {
        let err = SluiceError::Construction {
            unit: "filter_seen".into(),
            plugin: "seen".into(),
            message: "boom".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn register_errors_are_not_fatal() {
        assert!(!SluiceError::register("bad metadata").is_fatal());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SluiceError = io_err.into();
        assert!(matches!(err, SluiceError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SluiceError = json_err.into();
        assert!(matches!(err, SluiceError::Json(_)));
    }

    // --- Entry ---

    #[test]
    fn entry_extra_fields_flatten_in_json() {
        let mut entry = Entry::new("Some.Show.S01E01", "http://example.com/1");
        entry.set_field("quality", serde_json::json!("720p"));

        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["title"], "Some.Show.S01E01");
        assert_eq!(v["quality"], "720p");

        let back: Entry = serde_json::from_value(v).unwrap();
        assert_eq!(back.field("quality"), Some(&serde_json::json!("720p")));
    }
}
