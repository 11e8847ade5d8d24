//! # Scan Orchestration
//!
//! Runs a set of security detectors against one artifact and merges their
//! findings.
//!
//! ## Run Flow
//!
//! ```text
//! Init → PreProcess → Schedule (fixed ∥ → context_scan → ingested_context_scan) → Aggregate → Done
//! ```

pub mod aggregate;
pub mod batch;
pub mod cancel;
pub mod detectors;
pub mod events;
pub mod interfaces;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod weights;

pub use aggregate::{aggregate, Aggregation};
pub use batch::{BatchProgress, BatchReport, BatchRunner};
pub use cancel::{cancel_all, DetectorTask, RunGuard, ScanCommand};
pub use detectors::{DetectorDescriptor, DetectorFamily, DetectorPlan, FixedDetector, VariableFamily};
pub use events::{EventSink, ScanEvent, ScanEventKind};
pub use interfaces::{
    BatchFindings, BatchInvoker, CapabilityResolver, DetectorInput, DetectorInvoker,
    FamilyInvoker, PreProcessor, StaticCapabilities, Summary,
};
pub use orchestrator::ScanOrchestrator;
pub use outcome::{SkipReason, TaskOutcome};
pub use pipeline::{Pipeline, ScanStage};
pub use progress::ProgressTracker;
pub use scheduler::{BatchSizes, Prerequisites, ScheduleReport, Scheduler};
pub use weights::{allocate, WeightTable};
