//! # Result Aggregator
//!
//! Merges per-detector outcomes into one provenance-tagged, deduplicated list.

use std::collections::{BTreeMap, HashMap};

use super::outcome::TaskOutcome;
use crate::findings::{Finding, FindingSet};

/// Combined findings of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// Deduplicated findings, first occurrence wins
    pub findings: Vec<Finding>,
    pub by_detector: BTreeMap<String, Vec<Finding>>,
    pub duplicates_removed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Walk `order` (completion order) and merge each detector's findings
///
/// Names in `order` without an outcome are ignored, as are outcomes whose
/// name never appears in `order`.
pub fn aggregate(outcomes: &HashMap<String, TaskOutcome>, order: &[String]) -> Aggregation {
    let mut combined = FindingSet::new();
    let mut agg = Aggregation::default();
    let mut total = 0;

    for name in order {
        let Some(outcome) = outcomes.get(name) else {
            tracing::warn!(detector = %name, "No outcome recorded for detector");
            continue;
        };

        let tagged: Vec<Finding> = match outcome {
            TaskOutcome::Success(findings) => {
                agg.succeeded += 1;
                findings.iter().cloned().map(|f| f.tagged(name)).collect()
            }
            TaskOutcome::Failure(error) => {
                agg.failed += 1;
                tracing::warn!(detector = %name, "Detector contributed no findings: {}", error);
                Vec::new()
            }
            TaskOutcome::Skipped(reason) => {
                agg.skipped += 1;
                tracing::debug!(detector = %name, "Detector skipped: {}", reason);
                Vec::new()
            }
        };

        total += tagged.len();
        combined.extend(tagged.iter().cloned());
        agg.by_detector.insert(name.clone(), tagged);
    }

    agg.duplicates_removed = total - combined.len();
    agg.findings = combined.into_vec();
    agg
}
