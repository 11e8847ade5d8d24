//! # Progress Tracker
//!
//! Single writer of [`ScanState`]. Converts detector completions into a
//! bounded, monotonic progress value and persists after every change.
//!
//! ## Bands
//!
//! ```text
//! 0 ── Setup ── pre_weight ── Detectors ── cap ── Postprocess ── 100
//! ```

use std::sync::Arc;

use super::pipeline::ScanStage;
use super::weights::WeightTable;
use crate::config::OrchestratorConfig;
use crate::error::TrackerError;
use crate::state::{DetectorStatus, ScanState, ScanStore};

pub struct ProgressTracker {
    state: ScanState,
    weights: WeightTable,
    pre_weight: u8,
    cap: u8,
    store: Arc<dyn ScanStore>,
}

impl ProgressTracker {
    /// Take ownership of a fresh state and register every weighted detector
    pub fn new(
        mut state: ScanState,
        weights: WeightTable,
        config: &OrchestratorConfig,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        state.register(weights.names());
        Self {
            state,
            weights,
            pre_weight: config.pre_detector_weight,
            cap: config.detector_stage_cap(),
            store,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn progress(&self) -> u8 {
        self.state.progress
    }

    pub fn detector_stage_cap(&self) -> u8 {
        self.cap
    }

    /// Record a detector completion and recompute progress
    ///
    /// Failed and skipped detectors still consume their weight.
    pub fn on_detector_complete(
        &mut self,
        name: &str,
        status: DetectorStatus,
    ) -> Result<u8, TrackerError> {
        if !self.weights.contains(name) {
            tracing::warn!(detector = name, "Completion for unknown detector ignored");
            return Err(TrackerError::UnknownDetector(name.to_string()));
        }

        match self.state.detectors.get(name) {
            Some(existing) if !existing.is_pending() => {
                tracing::warn!(
                    detector = name,
                    existing = ?existing,
                    "Detector already completed, keeping first outcome"
                );
                return Ok(self.state.progress);
            }
            _ => {}
        }

        let status = if status.is_pending() {
            DetectorStatus::Failed
        } else {
            status
        };
        self.state.detectors.insert(name.to_string(), status);
        self.state.completed_detectors += 1;

        let current = if self.state.completed_detectors >= self.state.total_detectors {
            self.cap
        } else {
            self.weighted_progress()
        };
        self.state.progress = self.state.progress.max(current);

        tracing::debug!(
            detector = name,
            status = ?status,
            completed = self.state.completed_detectors,
            total = self.state.total_detectors,
            progress = self.state.progress,
            "Detector completed"
        );

        self.persist();
        Ok(self.state.progress)
    }

    /// pre_weight + weights of every non-pending detector, clamped to the cap
    fn weighted_progress(&self) -> u8 {
        let done: f64 = self
            .state
            .detectors
            .iter()
            .filter(|(_, status)| !status.is_pending())
            .filter_map(|(name, _)| self.weights.get(name))
            .sum();
        let current = (f64::from(self.pre_weight) + done).floor();
        current.clamp(0.0, f64::from(self.cap)) as u8
    }

    /// Raise progress to at least `value` (capped at 100)
    pub fn advance_to(&mut self, value: u8) -> u8 {
        let value = value.min(100);
        if value > self.state.progress {
            self.state.progress = value;
            self.persist();
        }
        self.state.progress
    }

    pub fn set_stage(&mut self, stage: ScanStage) {
        self.state.stage = stage;
        self.persist();
    }

    /// Mark the run failed without touching progress
    pub fn fail(&mut self, error: &str) {
        self.state.stage = ScanStage::Failed;
        self.state.error = Some(error.to_string());
        self.persist();
    }

    /// Terminal transition after the result is stored
    pub fn finish(&mut self) {
        self.state.stage = ScanStage::Done;
        self.state.progress = 100;
        self.persist();
    }

    /// Best-effort save; a failed save never stops the run
    pub fn persist(&mut self) {
        self.state.touch();
        if let Err(e) = self.store.save_progress(&self.state) {
            tracing::warn!(scan_id = %self.state.scan_id, "Failed to save scan progress: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanKind;
    use crate::state::{ScanDb, SqliteScanStore};
    use crate::scan::detectors::{DetectorDescriptor, DetectorPlan, FixedDetector};
    use crate::scan::weights::allocate;

    fn tracker(plan: &DetectorPlan) -> (ProgressTracker, Arc<SqliteScanStore>) {
        let config = OrchestratorConfig::default();
        let store = Arc::new(SqliteScanStore::new(&ScanDb::open_in_memory().unwrap()));
        let weights = allocate(plan, f64::from(config.detector_stage_budget));
        let mut tracker = ProgressTracker::new(
            ScanState::new("scan-1", ScanKind::File),
            weights,
            &config,
            store.clone(),
        );
        tracker.advance_to(config.pre_detector_weight);
        (tracker, store)
    }

    fn plan() -> DetectorPlan {
        DetectorPlan {
            fixed: FixedDetector::ALL
                .into_iter()
                .map(DetectorDescriptor::fixed)
                .collect(),
            ..DetectorPlan::default()
        }
    }

    #[test]
    fn test_unknown_detector_is_reported_and_ignored() {
        let (mut tracker, _) = tracker(&plan());
        let before = tracker.progress();

        let err = tracker
            .on_detector_complete("ghost", DetectorStatus::Succeeded)
            .unwrap_err();
        assert_eq!(err, TrackerError::UnknownDetector("ghost".to_string()));
        assert_eq!(tracker.progress(), before);
        assert_eq!(tracker.state().completed_detectors, 0);
    }

    #[test]
    fn test_failures_consume_weight() {
        let (mut tracker, _) = tracker(&plan());
        let progress = tracker
            .on_detector_complete("static_analyzer", DetectorStatus::Failed)
            .unwrap();
        // 25 + 8
        assert_eq!(progress, 33);
        assert_eq!(
            tracker.state().status("static_analyzer"),
            Some(DetectorStatus::Failed)
        );
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let (mut tracker, _) = tracker(&plan());
        let cap = tracker.detector_stage_cap();
        let mut last = tracker.progress();

        for (i, detector) in FixedDetector::ALL.iter().enumerate() {
            let progress = tracker
                .on_detector_complete(detector.name(), DetectorStatus::Succeeded)
                .unwrap();
            assert!(progress >= last);
            if i + 1 < FixedDetector::ALL.len() {
                assert!(progress <= cap);
            }
            last = progress;
        }

        assert_eq!(tracker.progress(), cap);
        assert!(tracker.state().is_complete());
    }

    #[test]
    fn test_completion_closes_rounding_gap() {
        // 25 + 8 + 8 + 6 + 3 = 50 < 80 before the final completion rule kicks in
        let (mut tracker, _) = tracker(&plan());
        tracker
            .on_detector_complete("static_analyzer", DetectorStatus::Succeeded)
            .unwrap();
        tracker
            .on_detector_complete("symbolic_executor", DetectorStatus::Succeeded)
            .unwrap();
        tracker
            .on_detector_complete("invariant_checker", DetectorStatus::Skipped)
            .unwrap();
        assert_eq!(tracker.progress(), 47);

        let last = tracker
            .on_detector_complete("pattern_matcher", DetectorStatus::Succeeded)
            .unwrap();
        assert_eq!(last, 80);
    }

    #[test]
    fn test_first_outcome_is_never_overwritten() {
        let (mut tracker, _) = tracker(&plan());
        tracker
            .on_detector_complete("pattern_matcher", DetectorStatus::Succeeded)
            .unwrap();
        tracker
            .on_detector_complete("pattern_matcher", DetectorStatus::Failed)
            .unwrap();

        assert_eq!(
            tracker.state().status("pattern_matcher"),
            Some(DetectorStatus::Succeeded)
        );
        assert_eq!(tracker.state().completed_detectors, 1);
    }

    #[test]
    fn test_never_regresses_externally_set_progress() {
        let (mut tracker, _) = tracker(&plan());
        tracker.advance_to(95);
        let progress = tracker
            .on_detector_complete("pattern_matcher", DetectorStatus::Succeeded)
            .unwrap();
        assert_eq!(progress, 95);
        assert_eq!(tracker.advance_to(10), 95);
    }

    #[test]
    fn test_every_change_is_persisted() {
        let (mut tracker, store) = tracker(&plan());
        tracker
            .on_detector_complete("static_analyzer", DetectorStatus::Succeeded)
            .unwrap();

        let record = store.load("scan-1").unwrap();
        assert_eq!(record.progress(), 33);
        assert_eq!(record.state.completed_detectors, 1);
        assert_eq!(record.state.total_detectors, 4);
    }
}
