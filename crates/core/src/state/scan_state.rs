//! # Scan State
//!
//! The mutable run-time record of one scan. Only the progress tracker writes
//! to it while detectors are running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::ScanKind;
use crate::scan::pipeline::ScanStage;

/// Status of one detector in the state map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl DetectorStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, DetectorStatus::Pending)
    }
}

/// Mutable run-time record, persisted after every externally visible change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanState {
    pub scan_id: String,
    pub kind: ScanKind,
    pub stage: ScanStage,
    /// detector name -> status
    pub detectors: BTreeMap<String, DetectorStatus>,
    pub total_detectors: usize,
    pub completed_detectors: usize,
    /// Overall progress, 0-100
    pub progress: u8,
    /// Fatal error message when the run failed
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanState {
    pub fn new(scan_id: impl Into<String>, kind: ScanKind) -> Self {
        let now = Utc::now();
        Self {
            scan_id: scan_id.into(),
            kind,
            stage: ScanStage::Init,
            detectors: BTreeMap::new(),
            total_detectors: 0,
            completed_detectors: 0,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Register detectors as pending
    pub fn register<'a, I: IntoIterator<Item = &'a str>>(&mut self, names: I) {
        for name in names {
            self.detectors
                .entry(name.to_string())
                .or_insert(DetectorStatus::Pending);
        }
        self.total_detectors = self.detectors.len();
    }

    pub fn status(&self, name: &str) -> Option<DetectorStatus> {
        self.detectors.get(name).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.total_detectors > 0 && self.completed_detectors >= self.total_detectors
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_marks_pending_and_counts() {
        let mut state = ScanState::new("scan-1", ScanKind::File);
        state.register(["static_analyzer", "pattern_matcher", "static_analyzer"]);

        assert_eq!(state.total_detectors, 2);
        assert_eq!(state.status("static_analyzer"), Some(DetectorStatus::Pending));
        assert!(!state.is_complete());
    }

    #[test]
    fn test_state_serialization() {
        let mut state = ScanState::new("scan-2", ScanKind::Diff);
        state.register(["pattern_matcher"]);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"pattern_matcher\":\"pending\""));
        assert!(json.contains("\"stage\":\"init\""));

        let back: ScanState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scan_id, "scan-2");
        assert_eq!(back.kind, ScanKind::Diff);
    }
}
