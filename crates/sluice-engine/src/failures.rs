//! Bounded ledger of recently failed entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sluice_types::Result;

use crate::session::SessionStore;

/// How many failures the ledger keeps before evicting the oldest.
pub const FAILED_MAX: usize = 25;

const FAILED_KEY: &str = "failed";

/// One remembered failure. `(title, url)` identifies the entry; a repeat
/// failure refreshes the timestamp instead of adding a second record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub title: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// View over the session's `failed` key.
pub struct FailureLog {
    session: SessionStore,
}

impl FailureLog {
    pub fn new(session: SessionStore) -> Self {
        FailureLog { session }
    }

    /// Remembers a failure. Any previous record with the same title and
    /// url is replaced, and the ledger is trimmed to [`FAILED_MAX`]
    /// records, oldest first.
    pub async fn record(&self, title: &str, url: &str) -> Result<()> {
        let mut records = self.list().await;
        records.retain(|r| !(r.title == title && r.url == url));
        records.push(FailureRecord {
            title: title.to_string(),
            url: url.to_string(),
            timestamp: Utc::now(),
        });
        while records.len() > FAILED_MAX {
            records.remove(0);
        }
        tracing::debug!(title = %title, "Failure recorded");
        self.store(records).await
    }

    /// All remembered failures, oldest first. Missing or malformed
    /// ledger state reads as empty.
    pub async fn list(&self) -> Vec<FailureRecord> {
        match self.session.get(FAILED_KEY).await {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Empties the ledger; returns how many records were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let count = self.list().await.len();
        self.store(Vec::new()).await?;
        Ok(count)
    }

    async fn store(&self, records: Vec<FailureRecord>) -> Result<()> {
        let value = serde_json::to_value(records)?;
        self.session.set(FAILED_KEY, value).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
