//! # Weight Allocator
//!
//! Splits the detector-stage progress budget across the active detectors.
//! Fixed detectors get their hard-coded weight; the variable-arity families
//! share whatever is left, evenly per instance.

use std::collections::HashMap;

use super::detectors::{DetectorDescriptor, DetectorFamily, DetectorPlan};

/// detector name -> share of the detector-stage budget
///
/// Read-only once allocated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    weights: HashMap<String, f64>,
}

impl WeightTable {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.weights.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.weights.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Round down to one decimal place
fn floor_tenth(value: f64) -> f64 {
    (value * 10.0).floor() / 10.0
}

/// Build the weight table for an active detector set
pub fn allocate(plan: &DetectorPlan, budget: f64) -> WeightTable {
    let budget = budget.max(0.0);
    let mut weights = HashMap::with_capacity(plan.len());

    let fixed_total: f64 = plan.fixed.iter().map(fixed_weight).sum();
    // A budget smaller than the fixed weights shrinks them proportionally.
    let scale = if fixed_total > budget && fixed_total > 0.0 {
        budget / fixed_total
    } else {
        1.0
    };

    let mut granted = 0.0;
    for desc in &plan.fixed {
        let weight = if scale < 1.0 {
            floor_tenth(fixed_weight(desc) * scale)
        } else {
            fixed_weight(desc)
        };
        granted += weight;
        weights.insert(desc.name.clone(), weight);
    }

    let remaining = (budget - granted).max(0.0);
    let instances = split_denominator(plan);
    if instances > 0 {
        let per_instance = floor_tenth(remaining / instances as f64);
        for desc in plan
            .context_scan
            .iter()
            .chain(plan.ingested_context_scan.iter())
        {
            weights.insert(desc.name.clone(), per_instance);
        }
    }

    tracing::debug!(
        detectors = weights.len(),
        fixed = granted,
        remaining,
        "Allocated detector weights"
    );

    WeightTable { weights }
}

/// Number of shares the remainder is divided into
///
/// Once the refinement family is active, the primary family always counts as
/// one share per profile/model pair, even when it is disabled for the run.
/// The completion rule closes the gap this leaves below the cap.
fn split_denominator(plan: &DetectorPlan) -> usize {
    let refinement = plan.ingested_context_scan.len();
    if refinement == 0 {
        plan.context_scan.len()
    } else {
        plan.context_scan.len().max(refinement) + refinement
    }
}

fn fixed_weight(desc: &DetectorDescriptor) -> f64 {
    match desc.family {
        DetectorFamily::Fixed(detector) => detector.weight(),
        DetectorFamily::Variable(_) => 0.0,
    }
}
