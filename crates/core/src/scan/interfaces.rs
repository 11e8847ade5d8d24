//! # External Collaborators
//!
//! Boundary traits the engine consumes. Capability policy, pre-processing,
//! and detector analysis all live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::detectors::{DetectorDescriptor, FixedDetector, VariableFamily};
use crate::findings::Finding;
use crate::models::{BuildArtifact, CapabilityMap, ScanContext, ScanKind, ScanRequest};

/// Feature gating the invariant-extraction step
pub const FEATURE_INVARIANTS: &str = "invariants";
/// Feature gating the structural-tree step
pub const FEATURE_STRUCTURE_TREE: &str = "structure_tree";
/// Feature gating the context-ingestion step
pub const FEATURE_CONTEXT_INGESTION: &str = "context_ingestion";

/// Resolves which detectors and features a run may use
pub trait CapabilityResolver: Send + Sync {
    fn resolve(&self, request: &ScanRequest) -> CapabilityMap;
}

/// Resolver returning the same precomputed map for every request
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities(pub CapabilityMap);

impl CapabilityResolver for StaticCapabilities {
    fn resolve(&self, _request: &ScanRequest) -> CapabilityMap {
        self.0.clone()
    }
}

/// Output of the mandatory summarization step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    #[serde(default)]
    pub detected_profile: Option<String>,
}

/// Pre-processing steps run before any detector
///
/// Only `summarize` is mandatory. The optional steps default to an error,
/// which the orchestrator logs and treats as "artifact not produced".
#[async_trait]
pub trait PreProcessor: Send + Sync {
    async fn summarize(&self, ctx: &ScanContext) -> anyhow::Result<Summary>;

    async fn extract_invariants(&self, _ctx: &ScanContext, _summary: &Summary) -> anyhow::Result<Value> {
        anyhow::bail!("invariant extraction not supported")
    }

    async fn build_structure_tree(&self, _ctx: &ScanContext) -> anyhow::Result<Value> {
        anyhow::bail!("structure tree generation not supported")
    }

    async fn ingest_context(&self, _ctx: &ScanContext, _summary: &Summary) -> anyhow::Result<Value> {
        anyhow::bail!("context ingestion not supported")
    }
}

/// Everything a detector may read, built once pre-processing is done
#[derive(Debug, Clone)]
pub struct DetectorInput {
    pub scan_id: String,
    pub kind: ScanKind,
    pub artifact: Arc<str>,
    pub summary: Summary,
    pub build: Option<BuildArtifact>,
    pub invariants: Option<Value>,
    pub structure_tree: Option<Value>,
    pub ingested_context: Option<Value>,
}

/// Findings of one chunk, keyed by instance name
pub type BatchFindings = HashMap<String, Vec<Finding>>;

/// Invokes the external detectors
#[async_trait]
pub trait DetectorInvoker: Send + Sync {
    /// Run one singleton detector
    async fn invoke_fixed(
        &self,
        detector: FixedDetector,
        input: &DetectorInput,
    ) -> anyhow::Result<Vec<Finding>>;

    /// Run one chunk of a variable-arity family in a single call
    ///
    /// `prior_findings` holds what earlier chunks of the same family reported
    /// when the family carries findings forward, and is empty otherwise.
    async fn invoke_batch(
        &self,
        family: VariableFamily,
        chunk: &[DetectorDescriptor],
        prior_findings: &[Finding],
        input: &DetectorInput,
    ) -> anyhow::Result<BatchFindings>;
}

/// Chunk-level seam consumed by the batch runner
#[async_trait]
pub trait BatchInvoker: Send + Sync {
    async fn invoke(
        &self,
        chunk: &[DetectorDescriptor],
        prior_findings: &[Finding],
    ) -> anyhow::Result<BatchFindings>;
}

/// Binds a [`DetectorInvoker`] to one family and one detector input
pub struct FamilyInvoker<'a> {
    pub invoker: &'a dyn DetectorInvoker,
    pub family: VariableFamily,
    pub input: &'a DetectorInput,
}

#[async_trait]
impl BatchInvoker for FamilyInvoker<'_> {
    async fn invoke(
        &self,
        chunk: &[DetectorDescriptor],
        prior_findings: &[Finding],
    ) -> anyhow::Result<BatchFindings> {
        self.invoker
            .invoke_batch(self.family, chunk, prior_findings, self.input)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_capabilities_ignore_request() {
        let resolver = StaticCapabilities(CapabilityMap::new().enable_feature(FEATURE_INVARIANTS));
        let caps = resolver.resolve(&ScanRequest::new("", ScanKind::Repository));
        assert!(caps.feature_enabled(FEATURE_INVARIANTS));
        assert!(!caps.feature_enabled(FEATURE_CONTEXT_INGESTION));
    }

    struct SummaryOnly;

    #[async_trait]
    impl PreProcessor for SummaryOnly {
        async fn summarize(&self, _ctx: &ScanContext) -> anyhow::Result<Summary> {
            Ok(Summary::default())
        }
    }

    #[tokio::test]
    async fn test_optional_steps_default_to_error() {
        let ctx = ScanContext::new(ScanRequest::new("", ScanKind::File), CapabilityMap::new());
        let pre = SummaryOnly;
        assert!(pre.summarize(&ctx).await.is_ok());
        assert!(pre.build_structure_tree(&ctx).await.is_err());
        assert!(pre.ingest_context(&ctx, &Summary::default()).await.is_err());
    }
}
