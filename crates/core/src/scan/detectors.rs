//! # Detector Catalogue
//!
//! The fixed set of detector families, and resolution of which detector
//! instances are active for a run.

use serde::{Deserialize, Serialize};

use crate::models::{ProfileModel, ScanContext};

/// Singleton detectors, each with a hard-coded progress weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedDetector {
    StaticAnalyzer,
    SymbolicExecutor,
    InvariantChecker,
    PatternMatcher,
}

impl FixedDetector {
    /// Declaration order, also the launch order of the parallel group
    pub const ALL: [FixedDetector; 4] = [
        FixedDetector::StaticAnalyzer,
        FixedDetector::SymbolicExecutor,
        FixedDetector::InvariantChecker,
        FixedDetector::PatternMatcher,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FixedDetector::StaticAnalyzer => "static_analyzer",
            FixedDetector::SymbolicExecutor => "symbolic_executor",
            FixedDetector::InvariantChecker => "invariant_checker",
            FixedDetector::PatternMatcher => "pattern_matcher",
        }
    }

    /// Share of the detector-stage budget granted when this detector is active
    pub fn weight(&self) -> f64 {
        match self {
            FixedDetector::StaticAnalyzer => 8.0,
            FixedDetector::SymbolicExecutor => 8.0,
            FixedDetector::InvariantChecker => 6.0,
            FixedDetector::PatternMatcher => 3.0,
        }
    }

    /// Needs a compiled, buildable artifact
    pub fn requires_build(&self) -> bool {
        match self {
            FixedDetector::StaticAnalyzer
            | FixedDetector::SymbolicExecutor
            | FixedDetector::InvariantChecker => true,
            FixedDetector::PatternMatcher => false,
        }
    }

    /// Needs the structural tree produced during pre-processing
    pub fn requires_structure_tree(&self) -> bool {
        matches!(self, FixedDetector::InvariantChecker)
    }
}

/// Detector families with one instance per (profile, model) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableFamily {
    /// Primary batch family
    ContextScan,
    /// Refinement family, fed by the ingested-context artifact
    IngestedContextScan,
}

impl VariableFamily {
    /// Execution order of the sequential groups
    pub const ALL: [VariableFamily; 2] = [
        VariableFamily::ContextScan,
        VariableFamily::IngestedContextScan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VariableFamily::ContextScan => "context_scan",
            VariableFamily::IngestedContextScan => "ingested_context_scan",
        }
    }

    /// Whether later chunks receive the findings of earlier ones
    pub fn carries_forward(&self) -> bool {
        match self {
            VariableFamily::ContextScan => false,
            VariableFamily::IngestedContextScan => true,
        }
    }
}

/// Family tag of a schedulable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "family", rename_all = "snake_case")]
pub enum DetectorFamily {
    Fixed(FixedDetector),
    Variable(VariableFamily),
}

/// One schedulable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectorDescriptor {
    /// Stable name used for weights, state, and reporting
    pub name: String,
    pub family: DetectorFamily,
    /// Set for variable-arity instances only
    #[serde(default)]
    pub profile_model: Option<ProfileModel>,
}

impl DetectorDescriptor {
    pub fn fixed(detector: FixedDetector) -> Self {
        Self {
            name: detector.name().to_string(),
            family: DetectorFamily::Fixed(detector),
            profile_model: None,
        }
    }

    pub fn instance(family: VariableFamily, pair: &ProfileModel, index: usize) -> Self {
        Self {
            name: format!(
                "{}_{}_{}_{}",
                family.name(),
                pair.profile,
                pair.model,
                index
            ),
            family: DetectorFamily::Variable(family),
            profile_model: Some(pair.clone()),
        }
    }
}

/// The active detector set of one run, grouped by how it is scheduled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorPlan {
    pub fixed: Vec<DetectorDescriptor>,
    pub context_scan: Vec<DetectorDescriptor>,
    pub ingested_context_scan: Vec<DetectorDescriptor>,
}

impl DetectorPlan {
    /// Resolve active detectors from the capability map
    pub fn resolve(ctx: &ScanContext) -> Self {
        let caps = &ctx.capabilities;

        let fixed = FixedDetector::ALL
            .into_iter()
            .filter(|d| caps.detector_enabled(d.name()))
            .map(DetectorDescriptor::fixed)
            .collect();

        let instances = |family: VariableFamily| -> Vec<DetectorDescriptor> {
            if !caps.detector_enabled(family.name()) {
                return Vec::new();
            }
            ctx.profile_models
                .iter()
                .enumerate()
                .map(|(index, pair)| DetectorDescriptor::instance(family, pair, index))
                .collect()
        };

        Self {
            fixed,
            context_scan: instances(VariableFamily::ContextScan),
            ingested_context_scan: instances(VariableFamily::IngestedContextScan),
        }
    }

    pub fn family(&self, family: VariableFamily) -> &[DetectorDescriptor] {
        match family {
            VariableFamily::ContextScan => &self.context_scan,
            VariableFamily::IngestedContextScan => &self.ingested_context_scan,
        }
    }

    /// Every active detector, in scheduling order
    pub fn all(&self) -> impl Iterator<Item = &DetectorDescriptor> {
        self.fixed
            .iter()
            .chain(self.context_scan.iter())
            .chain(self.ingested_context_scan.iter())
    }

    pub fn len(&self) -> usize {
        self.fixed.len() + self.context_scan.len() + self.ingested_context_scan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
