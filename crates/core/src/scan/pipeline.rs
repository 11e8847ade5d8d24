//! # Scan Stages
//!
//! `Init -> PreProcess -> Schedule -> Aggregate -> Done`, with `Failed`
//! reachable from any non-terminal stage.

use serde::{Deserialize, Serialize};

/// Stage of a scan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    /// Resolving detectors and allocating weights
    #[default]
    Init,
    /// Summarization and optional enrichment steps
    PreProcess,
    /// Detectors running
    Schedule,
    /// Merging findings
    Aggregate,
    /// Result persisted
    Done,
    /// Fatal error
    Failed,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Init => "init",
            ScanStage::PreProcess => "pre_process",
            ScanStage::Schedule => "schedule",
            ScanStage::Aggregate => "aggregate",
            ScanStage::Done => "done",
            ScanStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStage::Done | ScanStage::Failed)
    }
}

/// The scan state machine
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stage: ScanStage,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next stage
    pub fn advance(&mut self) -> ScanStage {
        self.stage = match self.stage {
            ScanStage::Init => ScanStage::PreProcess,
            ScanStage::PreProcess => ScanStage::Schedule,
            ScanStage::Schedule => ScanStage::Aggregate,
            ScanStage::Aggregate => ScanStage::Done,
            ScanStage::Done => ScanStage::Done,
            ScanStage::Failed => ScanStage::Failed,
        };
        self.stage
    }

    /// Fail the run; terminal stages are left untouched
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = ScanStage::Failed;
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == ScanStage::Done
    }
}
