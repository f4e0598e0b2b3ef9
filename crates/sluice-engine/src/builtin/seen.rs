//! Rejects entries a task has already accepted on an earlier run.
//!
//! Accepted identities (title and URL) are written to the session under
//! `seen` when the `exit` stage runs, and matched against every incoming
//! entry at `filter` before other filters get a look.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use sluice_types::Result;

use crate::handler::EventHandler;
use crate::loader::{PluginSymbol, Registrar};
use crate::task::Task;

const SEEN_KEY: &str = "seen";

pub(super) fn load() -> Result<Vec<PluginSymbol>> {
    Ok(vec![PluginSymbol {
        name: "seen",
        construct: || Ok(Arc::new(Seen)),
    }])
}

struct Seen;

#[async_trait]
impl EventHandler for Seen {
    fn handled_events(&self) -> Vec<&str> {
        vec!["filter", "exit"]
    }

    fn register(&self, reg: &mut Registrar<'_>) -> Result<()> {
        reg.register("seen", json!({"builtin": true, "filter_priority": 255}))
    }

    async fn on_event(&self, event: &str, task: &mut Task) -> Result<()> {
        match event {
            "filter" => self.filter(task).await,
            "exit" => self.remember(task).await,
            _ => Ok(()),
        }
    }

    fn about(&self) -> &str {
        "Remembers the title and URL of every accepted entry and rejects \
         both on later runs, so a task never re-processes an item it has \
         already taken."
    }
}

impl Seen {
    async fn filter(&self, task: &mut Task) -> Result<()> {
        let seen = task.session().get_or(SEEN_KEY, json!({})).await;
        let seen = seen.as_object().cloned().unwrap_or_default();
        let repeats: Vec<String> = task
            .entries()
            .iter()
            .filter(|entry| seen.contains_key(&entry.title) || seen.contains_key(&entry.url))
            .map(|entry| entry.title.clone())
            .collect();
        for title in repeats {
            task.reject(&title, "already seen");
        }
        Ok(())
    }

    async fn remember(&self, task: &mut Task) -> Result<()> {
        if task.accepted().is_empty() {
            return Ok(());
        }
        let session = task.session().clone();
        let mut seen = session
            .get_or(SEEN_KEY, json!({}))
            .await
            .as_object()
            .cloned()
            .unwrap_or_default();
        for entry in task.accepted() {
            seen.insert(entry.title.clone(), Value::Bool(true));
            seen.insert(entry.url.clone(), Value::Bool(true));
        }
        tracing::debug!(
            task = %task.name,
            entries = task.accepted().len(),
            "Remembered accepted entries"
        );
        session.set(SEEN_KEY, Value::Object(seen)).await;
        Ok(())
    }
}
