//! # Findings
//!
//! A finding is an opaque JSON payload reported by a detector, plus the name
//! of the detector it came from. Two findings are the same when every field
//! matches, provenance tag included.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

const PROVENANCE_KEY: &str = "detector";

/// One reported issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Detector that produced this finding (assigned by the aggregator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
    /// Fields reported by the detector
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Finding {
    /// Build a finding from a detector payload
    ///
    /// Non-object payloads are stored under a `value` key. A `detector` key
    /// in the payload becomes the provenance tag, so it is serialized once.
    pub fn new(payload: Value) -> Self {
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let detector = payload
            .remove(PROVENANCE_KEY)
            .and_then(|v| v.as_str().map(str::to_string));
        Self { detector, payload }
    }

    /// Tag the finding with its originating detector, replacing any earlier tag
    pub fn tagged(mut self, detector: &str) -> Self {
        self.detector = Some(detector.to_string());
        self
    }

    /// Canonical key used for structural equality
    ///
    /// `serde_json::Map` keeps keys sorted, so equal findings always produce
    /// the same string.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Insertion-ordered set of findings, deduplicated by structural equality
#[derive(Debug, Clone, Default)]
pub struct FindingSet {
    seen: HashSet<String>,
    items: Vec<Finding>,
}

impl FindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding, returning `false` if an equal one is already present
    pub fn insert(&mut self, finding: Finding) -> bool {
        if self.seen.insert(finding.fingerprint()) {
            self.items.push(finding);
            true
        } else {
            false
        }
    }

    /// Add every finding, returning how many were new
    pub fn extend<I: IntoIterator<Item = Finding>>(&mut self, findings: I) -> usize {
        findings
            .into_iter()
            .filter(|f| self.insert(f.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Finding] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.items
    }
}
