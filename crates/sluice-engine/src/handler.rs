//! Stage hook trait implemented by every plugin.

use async_trait::async_trait;

use sluice_types::Result;

use crate::loader::Registrar;
use crate::task::Task;

// ---------------------------------------------------------------------------
// EventHandler trait
// ---------------------------------------------------------------------------

/// A plugin instance hooked into one or more pipeline stages.
///
/// Capabilities are declared, not probed: `handled_events` is the single
/// source of truth for which stages (including `abort` and `terminate`)
/// this plugin participates in.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stage hooks this plugin implements (e.g. `["filter", "exit"]`).
    fn handled_events(&self) -> Vec<&str>;

    /// Called exactly once while the loader processes this plugin's unit.
    /// The [`Registrar`] is the only surface a plugin may use to register
    /// itself, request new pipeline stages, or extend the command line.
    fn register(&self, reg: &mut Registrar<'_>) -> Result<()>;

    /// Invoked once per task for every stage named in `handled_events`.
    async fn on_event(&self, event: &str, task: &mut Task) -> Result<()>;

    /// Documentation paragraph surfaced by `--doc` and `--list`.
    fn about(&self) -> &str {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoOp;

    #[async_trait]
    impl EventHandler for NoOp {
        fn handled_events(&self) -> Vec<&str> {
            vec!["filter"]
        }

        fn register(&self, _reg: &mut Registrar<'_>) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, _event: &str, _task: &mut Task) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn trait_objects_are_shareable() {
        let handler: Arc<dyn EventHandler> = Arc::new(NoOp);
        assert_eq!(handler.handled_events(), vec!["filter"]);
        assert_eq!(handler.about(), "");
    }
}
