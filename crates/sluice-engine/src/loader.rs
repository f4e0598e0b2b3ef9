//! Plugin loading: static unit tables, the registration surface, and the
//! prefix-ordered load queue.
//!
//! Units are compiled in rather than discovered on disk. The loader walks
//! a queue of name prefixes (the event sequence, then `module`, then
//! `source`), instantiates every exported symbol of each matching unit,
//! and runs its registration hook. Stages added during loading push their
//! own prefix onto the queue so their units load in the same pass.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use sluice_types::{value_kind, Result, SluiceError};

use crate::handler::EventHandler;
use crate::pipeline::{EventPipeline, Insertion, PendingInsertion};
use crate::registry::PluginRegistry;

// ---------------------------------------------------------------------------
// Unit table
// ---------------------------------------------------------------------------

/// One plugin exported by a unit.
#[derive(Clone)]
pub struct PluginSymbol {
    pub name: &'static str,
    pub construct: fn() -> Result<Arc<dyn EventHandler>>,
}

/// One compiled plugin unit, named `<prefix>_<name>`.
#[derive(Clone)]
pub struct PluginUnit {
    pub name: &'static str,
    pub load: fn() -> Result<Vec<PluginSymbol>>,
}

/// A command-line flag requested by a plugin during registration.
#[derive(Debug, Clone)]
pub struct CliFlag {
    pub name: String,
    pub help: String,
}

// ---------------------------------------------------------------------------
// Registrar — the only surface plugins see while loading
// ---------------------------------------------------------------------------

pub struct Registrar<'a> {
    registry: &'a mut PluginRegistry,
    pipeline: &'a mut EventPipeline,
    cli_flags: &'a mut Vec<CliFlag>,
    instance: Arc<dyn EventHandler>,
    unit: &'a str,
    new_events: Vec<String>,
}

impl<'a> Registrar<'a> {
    fn new(
        registry: &'a mut PluginRegistry,
        pipeline: &'a mut EventPipeline,
        cli_flags: &'a mut Vec<CliFlag>,
        instance: Arc<dyn EventHandler>,
        unit: &'a str,
    ) -> Self {
        Registrar {
            registry,
            pipeline,
            cli_flags,
            instance,
            unit,
            new_events: Vec::new(),
        }
    }

    /// Registers the plugin being loaded under `name`. `metadata` must be
    /// a map; see [`PluginRegistry::register`] for the recognized keys.
    pub fn register(&mut self, name: &str, metadata: Value) -> Result<()> {
        let metadata = match metadata {
            Value::Object(map) => map,
            other => {
                return Err(SluiceError::register(format!(
                    "metadata for '{name}' must be a map, got {}",
                    value_kind(&other)
                )))
            }
        };
        self.registry
            .register(name, self.instance.clone(), metadata, self.pipeline)
    }

    /// Requests a new pipeline stage relative to an existing one.
    /// A deferred request is not an error; it resolves when the anchor
    /// appears, or gets reported after loading if it never does.
    pub fn add_event(
        &mut self,
        event: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<()> {
        match self
            .pipeline
            .request_insertion(event, self.unit, before, after)?
        {
            Insertion::Resolved(events) => self.new_events.extend(events),
            Insertion::Deferred => {}
        }
        Ok(())
    }

    /// Asks the command-line layer to expose an extra boolean flag.
    pub fn add_cli_flag(&mut self, name: &str, help: &str) {
        self.cli_flags.push(CliFlag {
            name: name.to_string(),
            help: help.to_string(),
        });
    }

    fn take_new_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.new_events)
    }
}

// ---------------------------------------------------------------------------
// PluginLoader
// ---------------------------------------------------------------------------

/// What one loading pass did.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub registered: usize,
    pub skipped_units: Vec<String>,
    pub skipped_plugins: Vec<String>,
    pub unresolved: Vec<PendingInsertion>,
    pub cli_flags: Vec<CliFlag>,
}

pub struct PluginLoader {
    units: Vec<PluginUnit>,
}

impl PluginLoader {
    pub fn new() -> Self {
        PluginLoader { units: Vec::new() }
    }

    pub fn with_units(units: Vec<PluginUnit>) -> Self {
        PluginLoader { units }
    }

    pub fn add_unit(&mut self, unit: PluginUnit) {
        self.units.push(unit);
    }

    /// Loads every unit, registers its plugins, and seals the pipeline.
    /// Runs exactly once per process, before any task.
    ///
    /// Failure handling per class: a unit that fails to load is skipped;
    /// a symbol whose constructor fails aborts loading; a registration
    /// hook error skips that plugin only.
    pub fn load(
        &self,
        registry: &mut PluginRegistry,
        pipeline: &mut EventPipeline,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut cli_flags: Vec<CliFlag> = Vec::new();
        let already = registry.len();

        let mut queue: VecDeque<String> =
            pipeline.ordered_events().iter().cloned().collect();
        queue.push_back("module".to_string());
        queue.push_back("source".to_string());
        let mut processed: HashSet<&'static str> = HashSet::new();

        while let Some(prefix) = queue.pop_front() {
            let needle = format!("{prefix}_");
            for unit in self.units.iter().filter(|u| u.name.starts_with(&needle)) {
                if !processed.insert(unit.name) {
                    continue;
                }
                tracing::debug!(unit = %unit.name, prefix = %prefix, "Loading plugin unit");
                let symbols = match (unit.load)() {
                    Ok(symbols) => symbols,
                    Err(err) => {
                        tracing::warn!(
                            unit = %unit.name,
                            error = %err,
                            "Plugin unit is faulty, skipping"
                        );
                        report.skipped_units.push(unit.name.to_string());
                        continue;
                    }
                };
                for symbol in symbols {
                    let instance = match (symbol.construct)() {
                        Ok(instance) => instance,
                        Err(err) => {
                            return Err(SluiceError::Construction {
                                unit: unit.name.to_string(),
                                plugin: symbol.name.to_string(),
                                message: err.to_string(),
                            });
                        }
                    };
                    let mut registrar = Registrar::new(
                        registry,
                        pipeline,
                        &mut cli_flags,
                        instance.clone(),
                        unit.name,
                    );
                    match instance.register(&mut registrar) {
                        Ok(()) => {}
                        Err(SluiceError::Register(reason)) => {
                            tracing::warn!(
                                unit = %unit.name,
                                plugin = %symbol.name,
                                %reason,
                                "Plugin declined registration, skipping"
                            );
                            report.skipped_plugins.push(symbol.name.to_string());
                        }
                        Err(err) => {
                            tracing::error!(
                                unit = %unit.name,
                                plugin = %symbol.name,
                                error = %err,
                                "Plugin registration hook failed, skipping"
                            );
                            report.skipped_plugins.push(symbol.name.to_string());
                        }
                    }
                    // Stages that landed during this hook load their own
                    // units later in the same pass.
                    queue.extend(registrar.take_new_events());
                }
            }
        }

        for pending in pipeline.seal() {
            tracing::warn!(
                event = %pending.event,
                requester = %pending.requester,
                anchor = %pending.anchor.target(),
                "Requested stage never resolved, anchor does not exist"
            );
            report.unresolved.push(pending);
        }
        report.registered = registry.len() - already;
        report.cli_flags = cli_flags;
        tracing::info!(
            plugins = report.registered,
            events = pipeline.ordered_events().len(),
            "Plugin loading finished"
        );
        Ok(report)
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// The loader every normal run starts from: all built-in units.
pub fn default_loader() -> PluginLoader {
    PluginLoader::with_units(crate::builtin::builtin_units())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
