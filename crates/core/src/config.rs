//! # Orchestrator Configuration
//!
//! Progress bands, batch sizes, and run-time limits for the scan engine.
//! Loaded from `.vigil/config.json` when present; every field has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the persisted configuration
pub const DEFAULT_CONFIG_PATH: &str = ".vigil/config.json";

/// Configuration for the scan orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Progress points consumed by pre-processing (Setup band)
    pub pre_detector_weight: u8,
    /// Progress points shared by all detectors (Detectors band)
    pub detector_stage_budget: u8,
    /// Chunk size for the primary variable-arity family
    pub context_scan_batch_size: usize,
    /// Chunk size for the refinement variable-arity family
    pub ingested_scan_batch_size: usize,
    /// Pause between chunks of a sequential family, in milliseconds
    pub inter_batch_delay_ms: u64,
    /// Wall-clock budget for the whole run, in seconds
    pub run_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pre_detector_weight: 25,
            detector_stage_budget: 55,
            context_scan_batch_size: 2,
            ingested_scan_batch_size: 2,
            inter_batch_delay_ms: 1_000,
            run_timeout_secs: 3_600,
        }
    }
}

impl OrchestratorConfig {
    /// Load from the default path, falling back to defaults if the file is missing
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific path, falling back to defaults if the file is missing
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject band layouts that leave no room for post-processing
    pub fn validate(&self) -> Result<()> {
        if self.detector_stage_cap() >= 100 {
            anyhow::bail!(
                "pre_detector_weight + detector_stage_budget must stay below 100 (got {})",
                self.detector_stage_cap()
            );
        }
        if self.context_scan_batch_size == 0 || self.ingested_scan_batch_size == 0 {
            anyhow::bail!("batch sizes must be at least 1");
        }
        Ok(())
    }

    /// Ceiling for progress while detectors are running
    pub fn detector_stage_cap(&self) -> u8 {
        self.pre_detector_weight
            .saturating_add(self.detector_stage_budget)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.detector_stage_cap(), 80);
        assert_eq!(config.context_scan_batch_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"inter_batch_delay_ms": 0}"#).unwrap();
        assert_eq!(config.inter_batch_delay(), Duration::ZERO);
        assert_eq!(config.detector_stage_budget, 55);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = OrchestratorConfig::load_from(".vigil/does_not_exist.json").unwrap();
        assert_eq!(config.run_timeout(), Duration::from_secs(3_600));
    }

    #[test]
    fn test_validate_rejects_full_band() {
        let config = OrchestratorConfig {
            pre_detector_weight: 40,
            detector_stage_budget: 60,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
