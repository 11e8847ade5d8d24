//! # Scan Orchestrator
//!
//! Drives one scan through `Init -> PreProcess -> Schedule -> Aggregate -> Done`.
//! Only fatal errors (mandatory pre-processing, timeout, abort) unwind a run;
//! everything else degrades the result and is logged.

use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::aggregate::aggregate;
use super::cancel::{RunGuard, ScanCommand};
use super::detectors::{DetectorPlan, VariableFamily};
use super::events::{EventSink, ScanEvent, ScanEventKind};
use super::interfaces::{
    CapabilityResolver, DetectorInput, DetectorInvoker, PreProcessor, Summary,
    FEATURE_CONTEXT_INGESTION, FEATURE_INVARIANTS, FEATURE_STRUCTURE_TREE,
};
use super::pipeline::{Pipeline, ScanStage};
use super::progress::ProgressTracker;
use super::scheduler::{BatchSizes, Prerequisites, Scheduler};
use super::weights::allocate;
use crate::config::OrchestratorConfig;
use crate::error::ScanError;
use crate::models::{ScanContext, ScanRequest};
use crate::state::{RunSummary, ScanResult, ScanState, ScanStore};

/// Number of pre-processing steps sharing the pre-detector band
const PREPROCESS_STEPS: u8 = 4;

/// Artifacts produced before any detector runs
#[derive(Debug, Default)]
struct Preprocessed {
    summary: Summary,
    invariants: Option<Value>,
    structure_tree: Option<Value>,
    ingested_context: Option<Value>,
}

pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ScanStore>,
    resolver: Arc<dyn CapabilityResolver>,
    preprocessor: Arc<dyn PreProcessor>,
    invoker: Arc<dyn DetectorInvoker>,
    pipeline: Pipeline,
    event_tx: Option<mpsc::Sender<ScanEvent>>,
    command_rx: Option<mpsc::Receiver<ScanCommand>>,
    events: Vec<ScanEvent>,
}

impl ScanOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ScanStore>,
        resolver: Arc<dyn CapabilityResolver>,
        preprocessor: Arc<dyn PreProcessor>,
        invoker: Arc<dyn DetectorInvoker>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            preprocessor,
            invoker,
            pipeline: Pipeline::new(),
            event_tx: None,
            command_rx: None,
            events: Vec::new(),
        }
    }

    /// Set event channel for live updates
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ScanEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Set command channel; consumed by the next run
    pub fn with_command_channel(mut self, rx: mpsc::Receiver<ScanCommand>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    /// Events of the most recent run
    pub fn events(&self) -> &[ScanEvent] {
        &self.events
    }

    pub fn stage(&self) -> ScanStage {
        self.pipeline.stage
    }

    /// Run a scan to completion
    #[tracing::instrument(skip(self, request), fields(kind = request.kind.as_str()))]
    pub async fn run(&mut self, scan_id: &str, request: ScanRequest) -> Result<ScanResult, ScanError> {
        self.pipeline = Pipeline::new();
        let mut events = EventSink::new(scan_id, self.event_tx.clone());
        let mut guard = RunGuard::new(self.config.run_timeout(), self.command_rx.take());

        let result = self.execute(scan_id, request, &mut events, &mut guard).await;

        self.events = events.into_events();
        result
    }

    async fn execute(
        &mut self,
        scan_id: &str,
        request: ScanRequest,
        events: &mut EventSink,
        guard: &mut RunGuard,
    ) -> Result<ScanResult, ScanError> {
        let started_at = Utc::now();

        // Init
        let capabilities = self.resolver.resolve(&request);
        let ctx = ScanContext::new(request, capabilities);
        let plan = DetectorPlan::resolve(&ctx);
        let weights = allocate(&plan, f64::from(self.config.detector_stage_budget));
        let mut tracker = ProgressTracker::new(
            ScanState::new(scan_id, ctx.kind),
            weights,
            &self.config,
            Arc::clone(&self.store),
        );
        tracker.persist();

        let event = events.event(ScanEventKind::ScanStarted).with_data(json!({
            "kind": ctx.kind,
            "detectors": plan.all().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "weights": tracker.weights().total(),
        }));
        events.emit(event);

        if plan.is_empty() {
            return Err(self.abort_run(ScanError::NoDetectors, &mut tracker, events));
        }
        tracing::info!(
            detectors = plan.len(),
            fixed = plan.fixed.len(),
            "Resolved detector plan"
        );

        // PreProcess
        self.enter_stage(&mut tracker, events);
        let pre = tokio::select! {
            pre = self.preprocess(&ctx, &mut tracker, events) => pre,
            err = guard.cancelled() => Err(err),
        };
        let pre = match pre {
            Ok(pre) => pre,
            Err(err) => return Err(self.abort_run(err, &mut tracker, events)),
        };

        // Schedule
        self.enter_stage(&mut tracker, events);
        let prereqs = Prerequisites {
            has_build: ctx.has_build(),
            has_structure_tree: pre.structure_tree.is_some(),
            has_ingested_context: pre.ingested_context.is_some(),
        };
        let batch_size = |family: VariableFamily, default: usize| {
            ctx.capabilities.batch_size(family.name()).unwrap_or(default)
        };
        let scheduler = Scheduler::new(
            Arc::clone(&self.invoker),
            BatchSizes {
                context_scan: batch_size(
                    VariableFamily::ContextScan,
                    self.config.context_scan_batch_size,
                ),
                ingested_context_scan: batch_size(
                    VariableFamily::IngestedContextScan,
                    self.config.ingested_scan_batch_size,
                ),
            },
            self.config.inter_batch_delay(),
        );
        let detected_profile = pre.summary.detected_profile.clone();
        let summary_text = pre.summary.text.clone();
        let input = Arc::new(DetectorInput {
            scan_id: scan_id.to_string(),
            kind: ctx.kind,
            artifact: Arc::clone(&ctx.artifact),
            summary: pre.summary,
            build: ctx.build.clone(),
            invariants: pre.invariants,
            structure_tree: pre.structure_tree,
            ingested_context: pre.ingested_context,
        });
        let kind = ctx.kind;
        drop(ctx);

        let report = match scheduler
            .run(&plan, input, prereqs, &mut tracker, events, guard)
            .await
        {
            Ok(report) => report,
            Err(err) => return Err(self.abort_run(err, &mut tracker, events)),
        };

        // Aggregate
        self.enter_stage(&mut tracker, events);
        let agg = aggregate(&report.outcomes, &report.completion_order);
        let result = ScanResult {
            scan_id: scan_id.to_string(),
            summary: RunSummary {
                summary: summary_text,
                kind,
                total_detectors: tracker.state().total_detectors,
                succeeded: agg.succeeded,
                failed: agg.failed,
                skipped: agg.skipped,
                total_findings: agg.findings.len(),
                duplicates_removed: agg.duplicates_removed,
                started_at,
                finished_at: Utc::now(),
            },
            findings: agg.findings,
            findings_by_detector: agg.by_detector,
            detected_profile,
        };
        if let Err(e) = self.store.save_result(&result) {
            tracing::warn!("Failed to save scan result: {:#}", e);
        }

        // Done
        self.pipeline.advance();
        tracker.finish();
        let event = events.event(ScanEventKind::ScanCompleted).with_data(json!({
            "findings": result.summary.total_findings,
            "succeeded": result.summary.succeeded,
            "failed": result.summary.failed,
            "skipped": result.summary.skipped,
        }));
        events.emit(event);

        tracing::info!(
            findings = result.summary.total_findings,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            "Scan completed"
        );
        Ok(result)
    }

    fn enter_stage(&mut self, tracker: &mut ProgressTracker, events: &mut EventSink) {
        let stage = self.pipeline.advance();
        tracker.set_stage(stage);
        tracing::info!(stage = stage.as_str(), "Entering stage");
        let event = events
            .event(ScanEventKind::StageStarted)
            .with_data(json!({ "stage": stage }));
        events.emit(event);
    }

    /// Record a fatal error and hand it back for propagation
    fn abort_run(&mut self, err: ScanError, tracker: &mut ProgressTracker, events: &mut EventSink) -> ScanError {
        tracing::error!(stage = self.pipeline.stage.as_str(), "Scan failed: {}", err);
        self.pipeline.fail();
        tracker.fail(&err.to_string());
        let event = events.event(ScanEventKind::ScanFailed).with_data(json!({
            "error": err.to_string(),
            "progress": tracker.progress(),
        }));
        events.emit(event);
        err
    }

    async fn preprocess(
        &self,
        ctx: &ScanContext,
        tracker: &mut ProgressTracker,
        events: &mut EventSink,
    ) -> Result<Preprocessed, ScanError> {
        let summary = self
            .preprocessor
            .summarize(ctx)
            .await
            .map_err(ScanError::Preprocess)?;
        self.step_done(1, "summarize", true, tracker, events);

        let features = &ctx.capabilities;
        let invariants = optional_step(
            "extract_invariants",
            features.feature_enabled(FEATURE_INVARIANTS),
            self.preprocessor.extract_invariants(ctx, &summary),
        )
        .await;
        self.step_done(2, "extract_invariants", invariants.is_some(), tracker, events);

        let structure_tree = optional_step(
            "build_structure_tree",
            features.feature_enabled(FEATURE_STRUCTURE_TREE),
            self.preprocessor.build_structure_tree(ctx),
        )
        .await;
        self.step_done(3, "build_structure_tree", structure_tree.is_some(), tracker, events);

        let ingested_context = optional_step(
            "ingest_context",
            features.feature_enabled(FEATURE_CONTEXT_INGESTION),
            self.preprocessor.ingest_context(ctx, &summary),
        )
        .await;
        self.step_done(4, "ingest_context", ingested_context.is_some(), tracker, events);

        Ok(Preprocessed {
            summary,
            invariants,
            structure_tree,
            ingested_context,
        })
    }

    fn step_done(
        &self,
        step: u8,
        name: &str,
        produced: bool,
        tracker: &mut ProgressTracker,
        events: &mut EventSink,
    ) {
        let target = u16::from(self.config.pre_detector_weight) * u16::from(step)
            / u16::from(PREPROCESS_STEPS);
        let progress = tracker.advance_to(target as u8);
        let event = events.event(ScanEventKind::StepCompleted).with_data(json!({
            "step": name,
            "produced": produced,
            "progress": progress,
        }));
        events.emit(event);
    }
}

/// Run an optional step if its feature is enabled; failures leave it empty
async fn optional_step<F>(name: &str, enabled: bool, step: F) -> Option<Value>
where
    F: Future<Output = anyhow::Result<Value>>,
{
    if !enabled {
        tracing::debug!(step = name, "Optional step disabled");
        return None;
    }
    match step.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(step = name, "Optional pre-processing step failed: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Finding;
    use crate::models::{BuildArtifact, CapabilityMap, ScanKind};
    use crate::scan::detectors::{DetectorDescriptor, FixedDetector};
    use crate::scan::interfaces::{BatchFindings, StaticCapabilities};
    use crate::state::{DetectorStatus, ScanDb, SqliteScanStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockPreProcessor {
        fail_summary: bool,
        structure_tree: bool,
        ingested_context: bool,
    }

    #[async_trait]
    impl PreProcessor for MockPreProcessor {
        async fn summarize(&self, _ctx: &ScanContext) -> anyhow::Result<Summary> {
            if self.fail_summary {
                anyhow::bail!("summarizer unavailable");
            }
            Ok(Summary {
                text: "A vault contract".to_string(),
                detected_profile: Some("defi".to_string()),
            })
        }

        async fn build_structure_tree(&self, _ctx: &ScanContext) -> anyhow::Result<Value> {
            if !self.structure_tree {
                anyhow::bail!("parser crashed");
            }
            Ok(json!({ "contracts": ["Vault"] }))
        }

        async fn ingest_context(&self, _ctx: &ScanContext, _summary: &Summary) -> anyhow::Result<Value> {
            if !self.ingested_context {
                anyhow::bail!("no docs");
            }
            Ok(json!({ "docs": 1 }))
        }
    }

    #[derive(Default)]
    struct MockInvoker {
        fixed_calls: Mutex<Vec<FixedDetector>>,
        batch_calls: Mutex<Vec<Vec<String>>>,
        hang: bool,
    }

    #[async_trait]
    impl DetectorInvoker for MockInvoker {
        async fn invoke_fixed(
            &self,
            detector: FixedDetector,
            _input: &DetectorInput,
        ) -> anyhow::Result<Vec<Finding>> {
            self.fixed_calls.lock().unwrap().push(detector);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
            }
            Ok(vec![Finding::new(json!({ "title": "unchecked call" }))])
        }

        async fn invoke_batch(
            &self,
            _family: VariableFamily,
            chunk: &[DetectorDescriptor],
            _prior_findings: &[Finding],
            _input: &DetectorInput,
        ) -> anyhow::Result<BatchFindings> {
            self.batch_calls
                .lock()
                .unwrap()
                .push(chunk.iter().map(|d| d.name.clone()).collect());
            Ok(chunk
                .iter()
                .map(|d| (d.name.clone(), vec![Finding::new(json!({ "title": "unchecked call" }))]))
                .collect())
        }
    }

    struct Harness {
        orchestrator: ScanOrchestrator,
        store: Arc<SqliteScanStore>,
        invoker: Arc<MockInvoker>,
    }

    fn harness(
        config: OrchestratorConfig,
        caps: CapabilityMap,
        preprocessor: MockPreProcessor,
        invoker: MockInvoker,
    ) -> Harness {
        let store = Arc::new(SqliteScanStore::new(&ScanDb::open_in_memory().unwrap()));
        let invoker = Arc::new(invoker);
        let orchestrator = ScanOrchestrator::new(
            config,
            store.clone(),
            Arc::new(StaticCapabilities(caps)),
            Arc::new(preprocessor),
            invoker.clone(),
        );
        Harness {
            orchestrator,
            store,
            invoker,
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            inter_batch_delay_ms: 0,
            ..Default::default()
        }
    }

    fn request() -> ScanRequest {
        ScanRequest::new("contract Vault {}", ScanKind::File)
            .with_profile_model("security", "gpt-4o")
            .with_profile_model("gas", "claude")
    }

    fn progress_updates(events: &[ScanEvent]) -> Vec<u64> {
        events
            .iter()
            .filter(|e| e.kind == ScanEventKind::ProgressUpdated)
            .filter_map(|e| e.data.as_ref()?.get("progress")?.as_u64())
            .collect()
    }

    #[tokio::test]
    async fn test_all_success_run() {
        let caps = CapabilityMap::new()
            .enable_detector("pattern_matcher")
            .enable_detector("context_scan");
        let mut h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());

        let result = h.orchestrator.run("scan-1", request()).await.unwrap();

        // Single chunk of both instances
        let batches = h.invoker.batch_calls.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);

        let record = h.store.load("scan-1").unwrap();
        assert_eq!(record.state.total_detectors, 3);
        assert_eq!(record.state.completed_detectors, 3);
        assert_eq!(record.state.stage, ScanStage::Done);
        assert_eq!(record.progress(), 100);

        let updates = progress_updates(h.orchestrator.events());
        assert_eq!(updates.last().copied(), Some(80));
        assert!(updates.windows(2).all(|w| w[0] <= w[1]));

        // Same payload, three detectors: provenance keeps them apart
        assert_eq!(result.findings.len(), 3);
        assert_eq!(result.summary.succeeded, 3);
        assert_eq!(result.detected_profile.as_deref(), Some("defi"));
        assert!(record.result.is_some());
        assert_eq!(h.orchestrator.stage(), ScanStage::Done);
    }

    #[tokio::test]
    async fn test_missing_build_skips_build_dependent_detectors() {
        let caps = CapabilityMap::new()
            .enable_detector("static_analyzer")
            .enable_detector("pattern_matcher");
        let mut h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());

        let result = h.orchestrator.run("scan-2", request()).await.unwrap();

        assert_eq!(
            *h.invoker.fixed_calls.lock().unwrap(),
            vec![FixedDetector::PatternMatcher]
        );
        let state = h.store.load("scan-2").unwrap().state;
        assert_eq!(state.status("static_analyzer"), Some(DetectorStatus::Skipped));
        assert_eq!(state.total_detectors, 2);
        assert_eq!(state.completed_detectors, 2);
        assert_eq!(result.summary.skipped, 1);
        assert!(result.findings_by_detector["static_analyzer"].is_empty());
    }

    #[tokio::test]
    async fn test_unbuildable_artifact_counts_as_missing_build() {
        let caps = CapabilityMap::new().enable_detector("symbolic_executor");
        let mut h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());
        let request = request().with_build(BuildArtifact::not_buildable());

        let result = h.orchestrator.run("scan-3", request).await.unwrap();

        assert!(h.invoker.fixed_calls.lock().unwrap().is_empty());
        assert_eq!(result.summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_mandatory_step_failure_is_fatal() {
        let caps = CapabilityMap::new().enable_detector("pattern_matcher");
        let preprocessor = MockPreProcessor {
            fail_summary: true,
            ..Default::default()
        };
        let mut h = harness(config(), caps, preprocessor, MockInvoker::default());

        let err = h.orchestrator.run("scan-4", request()).await.unwrap_err();

        assert!(matches!(err, ScanError::Preprocess(_)));
        assert!(h.invoker.fixed_calls.lock().unwrap().is_empty());
        let state = h.store.load("scan-4").unwrap().state;
        assert_eq!(state.stage, ScanStage::Failed);
        assert!(state.progress <= 25);
        assert!(state.error.unwrap().contains("summarizer unavailable"));
        assert_eq!(h.orchestrator.stage(), ScanStage::Failed);
        assert_eq!(
            h.orchestrator.events().last().map(|e| e.kind.clone()),
            Some(ScanEventKind::ScanFailed)
        );
    }

    #[tokio::test]
    async fn test_optional_step_failure_degrades_gracefully() {
        let caps = CapabilityMap::new()
            .enable_detector("invariant_checker")
            .enable_detector("pattern_matcher")
            .enable_feature(FEATURE_STRUCTURE_TREE);
        let mut h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());
        let request = request().with_build(BuildArtifact::built("out/Vault.bin"));

        let result = h.orchestrator.run("scan-5", request).await.unwrap();

        let state = h.store.load("scan-5").unwrap().state;
        assert_eq!(state.status("invariant_checker"), Some(DetectorStatus::Skipped));
        assert_eq!(result.summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_preprocessing_fills_pre_detector_band() {
        let caps = CapabilityMap::new().enable_detector("pattern_matcher");
        let mut h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());

        h.orchestrator.run("scan-6", request()).await.unwrap();

        let steps: Vec<u64> = h
            .orchestrator
            .events()
            .iter()
            .filter(|e| e.kind == ScanEventKind::StepCompleted)
            .filter_map(|e| e.data.as_ref()?.get("progress")?.as_u64())
            .collect();
        assert_eq!(steps, vec![6, 12, 18, 25]);
    }

    #[tokio::test]
    async fn test_refinement_runs_when_context_is_ingested() {
        let caps = CapabilityMap::new()
            .enable_detector("ingested_context_scan")
            .enable_feature(FEATURE_CONTEXT_INGESTION)
            .with_batch_size("ingested_context_scan", 1);
        let preprocessor = MockPreProcessor {
            ingested_context: true,
            ..Default::default()
        };
        let mut h = harness(config(), caps, preprocessor, MockInvoker::default());

        let result = h.orchestrator.run("scan-7", request()).await.unwrap();

        assert_eq!(h.invoker.batch_calls.lock().unwrap().len(), 2);
        assert_eq!(result.summary.succeeded, 2);
    }

    #[tokio::test]
    async fn test_no_enabled_detector_is_fatal() {
        let mut h = harness(
            config(),
            CapabilityMap::new(),
            MockPreProcessor::default(),
            MockInvoker::default(),
        );

        let err = h.orchestrator.run("scan-8", request()).await.unwrap_err();
        assert!(matches!(err, ScanError::NoDetectors));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_run_without_partial_result() {
        let caps = CapabilityMap::new()
            .enable_detector("pattern_matcher")
            .enable_detector("context_scan");
        let config = OrchestratorConfig {
            run_timeout_secs: 60,
            ..config()
        };
        let invoker = MockInvoker {
            hang: true,
            ..Default::default()
        };
        let mut h = harness(config, caps, MockPreProcessor::default(), invoker);

        let err = h.orchestrator.run("scan-9", request()).await.unwrap_err();

        assert!(matches!(err, ScanError::Timeout(d) if d == Duration::from_secs(60)));
        let record = h.store.load("scan-9").unwrap();
        assert_eq!(record.state.stage, ScanStage::Failed);
        assert!(record.result.is_none());
        assert!(h.invoker.batch_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_command_fails_run() {
        let caps = CapabilityMap::new().enable_detector("pattern_matcher");
        let invoker = MockInvoker {
            hang: true,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(1);
        let h = harness(config(), caps, MockPreProcessor::default(), invoker);
        let mut orchestrator = h.orchestrator.with_command_channel(rx);
        tx.send(ScanCommand::Abort).await.unwrap();

        let err = orchestrator.run("scan-10", request()).await.unwrap_err();

        assert!(matches!(err, ScanError::Aborted));
        assert_eq!(h.store.load("scan-10").unwrap().state.stage, ScanStage::Failed);
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let caps = CapabilityMap::new().enable_detector("pattern_matcher");
        let (tx, mut rx) = mpsc::channel(64);
        let h = harness(config(), caps, MockPreProcessor::default(), MockInvoker::default());
        let mut orchestrator = h.orchestrator.with_event_channel(tx);

        orchestrator.run("scan-11", request()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ScanEventKind::ScanStarted);
        assert_eq!(first.scan_id, "scan-11");
        let mut last = first;
        while let Ok(event) = rx.try_recv() {
            last = event;
        }
        assert_eq!(last.kind, ScanEventKind::ScanCompleted);
    }
}
