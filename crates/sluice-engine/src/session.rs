//! Versioned cross-run state store.
//!
//! One JSON file per configuration holds everything the engine and its
//! plugins remember between runs: the schema version stamp, the failure
//! ledger, seen-entry identities, and any plugin-private keys. Test runs
//! open the store in volatile mode: existing state is readable, nothing
//! is ever written back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use sluice_types::{Result, SluiceError};

/// Schema version this engine writes and requires.
pub const SESSION_VERSION: i64 = 2;

const VERSION_KEY: &str = "version";

// ---------------------------------------------------------------------------
// Path conventions
// ---------------------------------------------------------------------------

/// The session file that belongs to a configuration file:
/// `session-<configname>.json` in the same directory.
pub fn session_path(config_path: &Path) -> PathBuf {
    companion_path(config_path, "session", "json")
}

/// The debug-dump file that belongs to a configuration file:
/// `dump-<configname>.toml` in the same directory.
pub fn dump_path(config_path: &Path) -> PathBuf {
    companion_path(config_path, "dump", "toml")
}

fn companion_path(config_path: &Path, prefix: &str, ext: &str) -> PathBuf {
    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());
    let file = format!("{prefix}-{stem}.{ext}");
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file),
        _ => PathBuf::from(file),
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

struct SessionInner {
    path: PathBuf,
    data: serde_json::Map<String, Value>,
    volatile: bool,
}

/// Shared handle to the session state.
///
/// Cloning a `SessionStore` yields another handle to the **same** state;
/// the task executor, the failure ledger, and every plugin all see one
/// store.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<tokio::sync::RwLock<SessionInner>>,
}

impl SessionStore {
    /// Opens the durable store at `path`. With `reset` the store starts
    /// empty no matter what is on disk; the old content is gone at the
    /// next [`close`](Self::close).
    pub async fn open(path: impl Into<PathBuf>, reset: bool) -> Result<Self> {
        Self::load(path.into(), reset, false).await
    }

    /// Opens the store for a dry run: existing durable state is visible,
    /// but nothing is written back and [`close`](Self::close) is a no-op.
    pub async fn open_volatile(path: impl Into<PathBuf>, reset: bool) -> Result<Self> {
        Self::load(path.into(), reset, true).await
    }

    async fn load(path: PathBuf, reset: bool, volatile: bool) -> Result<Self> {
        let data = if reset {
            tracing::info!(path = %path.display(), "Resetting session state");
            serde_json::Map::new()
        } else if tokio::fs::try_exists(&path).await? {
            let json = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Value>(&json)? {
                Value::Object(map) => map,
                other => {
                    return Err(SluiceError::Other(format!(
                        "Session file {} holds a {}, expected a map",
                        path.display(),
                        sluice_types::value_kind(&other)
                    )))
                }
            }
        } else {
            tracing::debug!(path = %path.display(), "No session file yet, starting fresh");
            serde_json::Map::new()
        };
        Ok(SessionStore {
            inner: Arc::new(tokio::sync::RwLock::new(SessionInner {
                path,
                data,
                volatile,
            })),
        })
    }

    /// Stamps a fresh store, or enforces the version gate on an existing
    /// one. `learn` turns a mismatch into a restamp instead of an error.
    pub async fn version_check(&self, learn: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(found) = inner.data.get(VERSION_KEY).cloned() else {
            inner
                .data
                .insert(VERSION_KEY.to_string(), Value::from(SESSION_VERSION));
            return Ok(());
        };
        if found == Value::from(SESSION_VERSION) {
            return Ok(());
        }
        let found = found.as_i64().unwrap_or_default();
        if !learn {
            return Err(SluiceError::IncompatibleSession {
                found,
                expected: SESSION_VERSION,
            });
        }
        tracing::warn!(
            found,
            expected = SESSION_VERSION,
            "Session version mismatch, restamping in learn mode"
        );
        inner
            .data
            .insert(VERSION_KEY.to_string(), Value::from(SESSION_VERSION));
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.data.get(key).cloned()
    }

    /// Like [`get`](Self::get), but falls back to `default` for a
    /// missing key.
    pub async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.inner.write().await.data.insert(key.to_string(), value);
    }

    /// A copy of the whole store.
    pub async fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.inner.read().await.data.clone()
    }

    pub async fn is_volatile(&self) -> bool {
        self.inner.read().await.volatile
    }

    /// Flushes the store to its durable path. Volatile stores skip the
    /// write entirely.
    pub async fn close(&self) -> Result<()> {
        let inner = self.inner.read().await;
        if inner.volatile {
            tracing::debug!("Volatile session, nothing flushed");
            return Ok(());
        }
        if let Some(parent) = inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&Value::Object(inner.data.clone()))?;
        tokio::fs::write(&inner.path, json).await?;
        tracing::debug!(path = %inner.path.display(), "Session saved");
        Ok(())
    }

    /// Writes a human-readable TOML rendering of the store to `path`.
    ///
    /// TOML has no null, so null-valued keys cannot survive the
    /// translation; each one is dropped with a logged diagnostic rather
    /// than failing the dump.
    pub async fn dump_debug_snapshot(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read().await;
        let root = sanitize(&Value::Object(inner.data.clone()));
        let text = match root {
            Some(document) => toml::to_string_pretty(&document)?,
            None => String::new(),
        };
        tokio::fs::write(path, text).await?;
        tracing::info!(path = %path.display(), "Session state dumped");
        Ok(())
    }
}

/// Recursively converts a JSON value into a TOML one, dropping whatever
/// TOML cannot express and logging each dropped location.
fn sanitize(value: &Value) -> Option<toml::Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(toml::Value::Integer(i))
            } else {
                n.as_f64().map(toml::Value::Float)
            }
        }
        Value::String(s) => Some(toml::Value::String(s.clone())),
        Value::Array(items) => {
            let mut kept = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match sanitize(item) {
                    Some(v) => kept.push(v),
                    None => tracing::warn!(index, "Dropping list element from dump, not representable"),
                }
            }
            Some(toml::Value::Array(kept))
        }
        Value::Object(map) => {
            let mut table = toml::map::Map::new();
            for (key, item) in map {
                match sanitize(item) {
                    Some(v) => {
                        table.insert(key.clone(), v);
                    }
                    None => tracing::warn!(key = %key, "Dropping key from dump, not representable"),
                }
            }
            Some(toml::Value::Table(table))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
