//! # Vigil Core
//!
//! Scan orchestration engine for a security-scan pipeline: decides which
//! detectors run, schedules them, tracks weighted progress, and merges their
//! findings into one deduplicated result.
//!
//! ## Architecture
//!
//! - `scan/` - Orchestrator, scheduler, batch runner, progress tracking
//! - `state/` - Scan state and the SQLite scan record store
//! - `models` - Scan requests, capability maps, build artifacts
//! - `findings` - Opaque findings and structural deduplication
//! - `config` - Orchestrator configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vigil_core::scan::ScanOrchestrator;
//!
//! let mut orchestrator = ScanOrchestrator::new(config, store, resolver, preprocessor, invoker);
//! let result = orchestrator.run("scan-42", request).await?;
//! ```

pub mod config;
pub mod error;
pub mod findings;
pub mod models;
pub mod scan;
pub mod state;

pub use config::OrchestratorConfig;
pub use error::{CancelError, DetectorError, ScanError, TrackerError};
