//! Plugin registry: metadata, capability flags, and lookups.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use sluice_types::{Result, SluiceError};

use crate::handler::EventHandler;
use crate::pipeline::EventPipeline;

/// Priority assumed for a stage hook with no `<stage>_priority` metadata.
pub const DEFAULT_PRIORITY: i64 = 128;

// ---------------------------------------------------------------------------
// PluginRecord
// ---------------------------------------------------------------------------

/// Everything the engine knows about one registered plugin. Immutable
/// once registration returns.
pub struct PluginRecord {
    pub name: String,
    pub instance: Arc<dyn EventHandler>,
    /// Ships with the engine rather than coming from an external unit.
    pub builtin: bool,
    /// Debugging aid; hidden from plugin listings unless asked for.
    pub debug: bool,
    /// Whether the instance declares at least one hook the pipeline knew
    /// about at registration time.
    pub has_events: bool,
    pub group: Option<String>,
    pub groups: Vec<String>,
    /// Per-stage invocation priority, parsed out of `<stage>_priority`
    /// metadata keys. Higher runs earlier.
    pub priorities: HashMap<String, i64>,
    /// Whatever metadata remains after the recognized keys are consumed.
    pub metadata: serde_json::Map<String, Value>,
    /// Registration sequence number; the documented tie-break for equal
    /// priorities.
    pub seq: usize,
}

impl PluginRecord {
    /// The plugin's priority at `event`.
    pub fn priority_for(&self, event: &str) -> i64 {
        self.priorities
            .get(event)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Whether the instance declares a hook for `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.instance.handled_events().contains(&event)
    }

    /// Whether the plugin belongs to `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group) || self.groups.iter().any(|g| g == group)
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("builtin", &self.builtin)
            .field("debug", &self.debug)
            .field("has_events", &self.has_events)
            .field("group", &self.group)
            .field("groups", &self.groups)
            .field("priorities", &self.priorities)
            .field("seq", &self.seq)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PluginRegistry
// ---------------------------------------------------------------------------

/// Registration-ordered plugin records with a name index.
///
/// Stage and group lookups scan the record list; nothing is indexed per
/// stage, so plugins registered against dynamically added stages need no
/// special handling.
pub struct PluginRegistry {
    records: Vec<Arc<PluginRecord>>,
    by_name: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry {
            records: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registers a plugin instance under a unique name.
    ///
    /// Recognized metadata keys are consumed: `builtin` (bool),
    /// `debug_plugin` (bool), `group` (string), `groups` (list of
    /// strings), and `<stage>_priority` (integer) for every live
    /// sequential stage. The rest is kept verbatim on the record.
    pub fn register(
        &mut self,
        name: &str,
        instance: Arc<dyn EventHandler>,
        mut metadata: serde_json::Map<String, Value>,
        pipeline: &EventPipeline,
    ) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(SluiceError::DuplicateRegistration(name.to_string()));
        }

        let builtin = metadata
            .remove("builtin")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let debug = metadata
            .remove("debug_plugin")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let group = metadata
            .remove("group")
            .and_then(|v| v.as_str().map(String::from));
        let groups = match metadata.remove("groups") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        let mut priorities = HashMap::new();
        for event in pipeline.ordered_events() {
            let key = format!("{event}_priority");
            let Some(value) = metadata.remove(&key) else {
                continue;
            };
            match value.as_i64() {
                Some(priority) => {
                    priorities.insert(event.clone(), priority);
                }
                None => tracing::warn!(
                    plugin = %name,
                    key = %key,
                    "Ignoring non-integer priority metadata"
                ),
            }
        }

        let has_events = instance
            .handled_events()
            .iter()
            .any(|e| pipeline.is_known_hook(e));
        if !has_events {
            tracing::debug!(plugin = %name, "Plugin declares no known stage hooks");
        }

        let seq = self.records.len();
        let record = PluginRecord {
            name: name.to_string(),
            instance,
            builtin,
            debug,
            has_events,
            group,
            groups,
            priorities,
            metadata,
            seq,
        };
        tracing::debug!(plugin = %name, seq, "Plugin registered");
        self.by_name.insert(name.to_string(), seq);
        self.records.push(Arc::new(record));
        Ok(())
    }

    /// Plugins hooked into `event`, highest priority first. Equal
    /// priorities keep registration order (the sort is stable over the
    /// registration-ordered record list).
    pub fn plugins_for_event(
        &self,
        event: &str,
        pipeline: &EventPipeline,
    ) -> Result<Vec<Arc<PluginRecord>>> {
        if !pipeline.is_known_hook(event) {
            return Err(SluiceError::UnknownEvent(event.to_string()));
        }
        let mut matching: Vec<Arc<PluginRecord>> = self
            .records
            .iter()
            .filter(|r| r.handles(event))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority_for(event).cmp(&a.priority_for(event)));
        Ok(matching)
    }

    /// Plugins belonging to `group`, in registration order.
    pub fn plugins_for_group(&self, group: &str) -> Vec<Arc<PluginRecord>> {
        self.records
            .iter()
            .filter(|r| r.in_group(group))
            .cloned()
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Result<&Arc<PluginRecord>> {
        self.by_name
            .get(name)
            .map(|idx| &self.records[*idx])
            .ok_or_else(|| SluiceError::UnknownPlugin(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PluginRecord>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
