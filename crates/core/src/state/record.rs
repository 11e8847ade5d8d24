//! # Scan Records
//!
//! The final run result handed back to the caller, and the stored record
//! combining it with the last persisted [`ScanState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::scan_state::ScanState;
use crate::findings::Finding;
use crate::models::ScanKind;

/// Counters and pre-processing output describing one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Text produced by the mandatory summarization step
    pub summary: String,
    pub kind: ScanKind,
    pub total_detectors: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_findings: usize,
    /// Findings dropped as structural duplicates during aggregation
    pub duplicates_removed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The final artifact of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    /// Deduplicated, provenance-tagged findings in completion order
    pub findings: Vec<Finding>,
    /// Per-detector breakdown for diagnostics
    pub findings_by_detector: BTreeMap<String, Vec<Finding>>,
    pub summary: RunSummary,
    /// Profile detected during summarization, if any
    #[serde(default)]
    pub detected_profile: Option<String>,
}

/// What the store holds for one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub state: ScanState,
    #[serde(default)]
    pub result: Option<ScanResult>,
}

impl ScanRecord {
    pub fn scan_id(&self) -> &str {
        &self.state.scan_id
    }

    pub fn progress(&self) -> u8 {
        self.state.progress
    }
}
