use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::findings::Finding;
use crate::state::DetectorStatus;

/// Why a detector was never invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Build artifact absent or marked non-buildable
    MissingBuild,
    /// Structural tree was not produced during pre-processing
    MissingStructureTree,
    /// Ingested-context artifact was not produced during pre-processing
    MissingIngestedContext,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::MissingBuild => "build artifact missing or not buildable",
            SkipReason::MissingStructureTree => "structure tree not produced",
            SkipReason::MissingIngestedContext => "ingested context not produced",
        };
        f.write_str(reason)
    }
}

/// Resolution of exactly one detector invocation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Vec<Finding>),
    Failure(DetectorError),
    Skipped(SkipReason),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn status(&self) -> DetectorStatus {
        match self {
            TaskOutcome::Success(_) => DetectorStatus::Succeeded,
            TaskOutcome::Failure(_) => DetectorStatus::Failed,
            TaskOutcome::Skipped(_) => DetectorStatus::Skipped,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        match self {
            TaskOutcome::Success(findings) => findings,
            TaskOutcome::Failure(_) | TaskOutcome::Skipped(_) => &[],
        }
    }
}
