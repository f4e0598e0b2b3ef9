//! Ordered event pipeline with load-time stage insertion.
//!
//! Tasks run through the sequential stages in order. During loading,
//! plugins may request new stages anchored before or after an existing
//! one; requests whose anchor is not live yet are parked and re-examined
//! every time a stage lands, so chains of insertions resolve regardless
//! of load order. After loading the pipeline is sealed and immutable.

use sluice_types::{Result, SluiceError};

/// Sequential stages every pipeline starts with, in execution order.
pub const BUILTIN_EVENTS: [&str; 7] = [
    "start", "input", "filter", "download", "modify", "output", "exit",
];

/// Hooks that exist outside the sequential order.
pub const VIRTUAL_EVENTS: [&str; 2] = ["abort", "terminate"];

// ---------------------------------------------------------------------------
// Insertion requests
// ---------------------------------------------------------------------------

/// Position of a requested stage relative to an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Before(String),
    After(String),
}

impl Anchor {
    /// The anchor stage's name.
    pub fn target(&self) -> &str {
        match self {
            Anchor::Before(name) | Anchor::After(name) => name,
        }
    }
}

/// A stage insertion whose anchor was not live at request time.
#[derive(Debug, Clone)]
pub struct PendingInsertion {
    pub event: String,
    pub requester: String,
    pub anchor: Anchor,
}

/// Outcome of a single insertion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The stage (and any parked stages it unblocked) went live,
    /// in resolution order.
    Resolved(Vec<String>),
    /// The anchor is not live yet; the request is parked.
    Deferred,
}

// ---------------------------------------------------------------------------
// EventPipeline
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EventPipeline {
    events: Vec<String>,
    pending: Vec<PendingInsertion>,
    sealed: bool,
}

impl EventPipeline {
    pub fn new() -> Self {
        EventPipeline {
            events: BUILTIN_EVENTS.iter().map(|s| s.to_string()).collect(),
            pending: Vec::new(),
            sealed: false,
        }
    }

    /// The live sequential stages, in execution order.
    pub fn ordered_events(&self) -> &[String] {
        &self.events
    }

    /// Whether `name` is a hook tasks can reach: a live sequential stage
    /// or one of the virtual stages.
    pub fn is_known_hook(&self, name: &str) -> bool {
        VIRTUAL_EVENTS.contains(&name) || self.is_live(name)
    }

    fn is_live(&self, name: &str) -> bool {
        self.events.iter().any(|e| e == name)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Requests a new sequential stage anchored to an existing one.
    ///
    /// Exactly one of `before`/`after` must be given. If the anchor is
    /// live the stage is inserted immediately and the pending queue is
    /// re-scanned to a fixed point, since the new stage may itself anchor
    /// parked requests. Otherwise the request is parked until the anchor
    /// appears (or until [`seal`](Self::seal) reports it unresolved).
    pub fn request_insertion(
        &mut self,
        event: &str,
        requester: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Insertion> {
        if self.sealed {
            return Err(SluiceError::PipelineSealed {
                event: event.to_string(),
            });
        }
        let anchor = match (before, after) {
            (Some(b), None) => Anchor::Before(b.to_string()),
            (None, Some(a)) => Anchor::After(a.to_string()),
            _ => {
                return Err(SluiceError::ConflictingAnchors {
                    event: event.to_string(),
                    requester: requester.to_string(),
                })
            }
        };
        if self.is_known_hook(event) || self.pending.iter().any(|p| p.event == event) {
            return Err(SluiceError::DuplicateEvent(event.to_string()));
        }

        let request = PendingInsertion {
            event: event.to_string(),
            requester: requester.to_string(),
            anchor,
        };
        if !self.try_place(&request) {
            tracing::debug!(
                event = %request.event,
                requester = %request.requester,
                anchor = %request.anchor.target(),
                "Anchor not live yet, parking insertion"
            );
            self.pending.push(request);
            return Ok(Insertion::Deferred);
        }

        let mut resolved = vec![event.to_string()];
        self.drain_pending(&mut resolved);
        Ok(Insertion::Resolved(resolved))
    }

    /// Ends the load phase. Returns the requests whose anchor never
    /// appeared; afterwards every insertion attempt fails.
    pub fn seal(&mut self) -> Vec<PendingInsertion> {
        self.sealed = true;
        std::mem::take(&mut self.pending)
    }

    /// Inserts the stage if its anchor is live. Returns whether it landed.
    fn try_place(&mut self, request: &PendingInsertion) -> bool {
        let target = request.anchor.target();
        let Some(idx) = self.events.iter().position(|e| e == target) else {
            return false;
        };
        let at = match request.anchor {
            Anchor::Before(_) => idx,
            Anchor::After(_) => idx + 1,
        };
        self.events.insert(at, request.event.clone());
        tracing::debug!(event = %request.event, index = at, "Pipeline stage added");
        true
    }

    /// Re-scans parked requests until no more can be placed.
    fn drain_pending(&mut self, resolved: &mut Vec<String>) {
        loop {
            let placeable = self
                .pending
                .iter()
                .position(|p| self.is_live(p.anchor.target()));
            let Some(pos) = placeable else { break };
            let request = self.pending.remove(pos);
            self.try_place(&request);
            resolved.push(request.event);
        }
    }
}

impl Default for EventPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pipeline: &EventPipeline) -> Vec<&str> {
        pipeline.ordered_events().iter().map(String::as_str).collect()
    }

    #[test]
    fn starts_with_builtin_order() {
        let pipeline = EventPipeline::new();
        assert_eq!(
            names(&pipeline),
            vec!["start", "input", "filter", "download", "modify", "output", "exit"]
        );
    }

    #[test]
    fn virtual_stages_are_known_but_not_sequential() {
        let pipeline = EventPipeline::new();
        assert!(pipeline.is_known_hook("abort"));
        assert!(pipeline.is_known_hook("terminate"));
        assert!(!pipeline.ordered_events().iter().any(|e| e == "abort"));
    }

    #[test]
    fn insert_before_lands_at_anchor_position() {
        let mut pipeline = EventPipeline::new();
        let outcome = pipeline
            .request_insertion("resolve", "module_resolver", Some("download"), None)
            .unwrap();
        assert_eq!(outcome, Insertion::Resolved(vec!["resolve".to_string()]));
        assert_eq!(
            names(&pipeline),
            vec!["start", "input", "filter", "resolve", "download", "modify", "output", "exit"]
        );
    }

    #[test]
    fn insert_after_lands_past_anchor() {
        let mut pipeline = EventPipeline::new();
        pipeline
            .request_insertion("archive", "output_archive", None, Some("output"))
            .unwrap();
        assert_eq!(
            names(&pipeline),
            vec!["start", "input", "filter", "download", "modify", "output", "archive", "exit"]
        );
    }

    #[test]
    fn both_anchors_rejected() {
        let mut pipeline = EventPipeline::new();
        let err = pipeline
            .request_insertion("x", "unit_x", Some("filter"), Some("download"))
            .unwrap_err();
        assert!(matches!(err, SluiceError::ConflictingAnchors { .. }));
    }

    #[test]
    fn neither_anchor_rejected() {
        let mut pipeline = EventPipeline::new();
        let err = pipeline
            .request_insertion("x", "unit_x", None, None)
            .unwrap_err();
        assert!(matches!(err, SluiceError::ConflictingAnchors { .. }));
    }

    #[test]
    fn duplicate_names_rejected_against_live_pending_and_virtual() {
        let mut pipeline = EventPipeline::new();
        assert!(matches!(
            pipeline.request_insertion("filter", "u", Some("input"), None),
            Err(SluiceError::DuplicateEvent(_))
        ));
        assert!(matches!(
            pipeline.request_insertion("abort", "u", None, Some("exit")),
            Err(SluiceError::DuplicateEvent(_))
        ));
        pipeline
            .request_insertion("parked", "u", Some("nowhere"), None)
            .unwrap();
        assert!(matches!(
            pipeline.request_insertion("parked", "u", None, Some("filter")),
            Err(SluiceError::DuplicateEvent(_))
        ));
    }

    #[test]
    fn deferred_until_anchor_appears_then_cascades() {
        let mut pipeline = EventPipeline::new();

        // Y anchors on X, which does not exist yet.
        let outcome = pipeline
            .request_insertion("y", "unit_y", None, Some("x"))
            .unwrap();
        assert_eq!(outcome, Insertion::Deferred);

        // X lands after filter and unblocks Y in the same resolution.
        let outcome = pipeline
            .request_insertion("x", "unit_x", None, Some("filter"))
            .unwrap();
        assert_eq!(
            outcome,
            Insertion::Resolved(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(
            names(&pipeline),
            vec!["start", "input", "filter", "x", "y", "download", "modify", "output", "exit"]
        );
    }

    #[test]
    fn cascade_reaches_fixed_point_across_chained_parks() {
        let mut pipeline = EventPipeline::new();
        pipeline.request_insertion("c", "u", None, Some("b")).unwrap();
        pipeline.request_insertion("b", "u", None, Some("a")).unwrap();
        let outcome = pipeline
            .request_insertion("a", "u", None, Some("modify"))
            .unwrap();
        assert_eq!(
            outcome,
            Insertion::Resolved(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            names(&pipeline),
            vec!["start", "input", "filter", "download", "modify", "a", "b", "c", "output", "exit"]
        );
    }

    #[test]
    fn seal_reports_unresolved_and_blocks_mutation() {
        let mut pipeline = EventPipeline::new();
        pipeline
            .request_insertion("ghost", "module_ghost", Some("never_lands"), None)
            .unwrap();

        let unresolved = pipeline.seal();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].event, "ghost");
        assert_eq!(unresolved[0].requester, "module_ghost");
        assert_eq!(unresolved[0].anchor.target(), "never_lands");

        assert!(pipeline.is_sealed());
        assert!(matches!(
            pipeline.request_insertion("late", "u", Some("filter"), None),
            Err(SluiceError::PipelineSealed { .. })
        ));
        // The unresolved stage never became reachable.
        assert!(!pipeline.is_known_hook("ghost"));
    }
}
