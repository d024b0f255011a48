//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! stage transitions and per-unit oracle events while a document runs.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal spinner, a log, or a job record
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` because unit events fire from concurrent oracle
//! calls.

use crate::orchestrator::Stage;
use std::sync::Arc;

/// Called by the orchestrator as a document moves through the pipeline.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_unit_complete` may be called concurrently from different tasks.
/// Implementations must protect shared mutable state with appropriate
/// synchronisation primitives (e.g. `Mutex`, `AtomicUsize`).
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called whenever the state machine enters a new stage.
    fn on_stage(&self, filename: &str, stage: Stage) {
        let _ = (filename, stage);
    }

    /// Called before a fan-out of oracle calls (OCR pages, relevance
    /// sections or extraction pairs).
    ///
    /// * `label`: short name of the work, e.g. `"relevance"`
    /// * `total`: number of units that will run
    fn on_units_start(&self, label: &str, total: usize) {
        let _ = (label, total);
    }

    /// Called after each unit finishes, successfully or not.
    fn on_unit_complete(&self, label: &str, ok: bool) {
        let _ = (label, ok);
    }

    /// Called once with the outcome of the run.
    ///
    /// * `error`: `None` on success, the failure message otherwise
    fn on_finished(&self, filename: &str, error: Option<&str>) {
        let _ = (filename, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        stages: Mutex<Vec<Stage>>,
        units: AtomicUsize,
        failed_units: AtomicUsize,
    }

    impl ExtractionProgressCallback for Tracking {
        fn on_stage(&self, _filename: &str, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_unit_complete(&self, _label: &str, ok: bool) {
            self.units.fetch_add(1, Ordering::SeqCst);
            if !ok {
                self.failed_units.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage("a.pdf", Stage::Ingested);
        cb.on_units_start("relevance", 4);
        cb.on_unit_complete("relevance", false);
        cb.on_finished("a.pdf", Some("boom"));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        t.on_stage("a.pdf", Stage::Ingested);
        t.on_stage("a.pdf", Stage::Extracted);
        t.on_unit_complete("extract", true);
        t.on_unit_complete("extract", false);

        assert_eq!(
            *t.stages.lock().unwrap(),
            vec![Stage::Ingested, Stage::Extracted]
        );
        assert_eq!(t.units.load(Ordering::SeqCst), 2);
        assert_eq!(t.failed_units.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage("x.pdf", Stage::Done);
    }
}
