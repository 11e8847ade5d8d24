//! # Concurrency Scheduler
//!
//! Runs the detector stage of a scan:
//!
//! ```text
//! fixed detectors (parallel) ──▶ context_scan (chunked) ──▶ ingested_context_scan (chunked, carry-forward)
//! ```
//!
//! Parallel tasks report back over a channel, so every completion is observed
//! by this single loop and the progress tracker keeps exactly one writer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::batch::{BatchProgress, BatchRunner};
use super::cancel::{cancel_all, DetectorTask, RunGuard};
use super::detectors::{DetectorDescriptor, DetectorFamily, DetectorPlan, FixedDetector, VariableFamily};
use super::events::{EventSink, ScanEventKind};
use super::interfaces::{DetectorInput, DetectorInvoker, FamilyInvoker};
use super::outcome::{SkipReason, TaskOutcome};
use super::progress::ProgressTracker;
use crate::error::{DetectorError, ScanError};

/// Which pre-processing and build artifacts exist for this run
#[derive(Debug, Clone, Copy, Default)]
pub struct Prerequisites {
    pub has_build: bool,
    pub has_structure_tree: bool,
    pub has_ingested_context: bool,
}

impl Prerequisites {
    /// Reason a fixed detector cannot run, if any
    pub fn gap(&self, detector: FixedDetector) -> Option<SkipReason> {
        if detector.requires_build() && !self.has_build {
            Some(SkipReason::MissingBuild)
        } else if detector.requires_structure_tree() && !self.has_structure_tree {
            Some(SkipReason::MissingStructureTree)
        } else {
            None
        }
    }
}

/// Outcomes of the detector stage
#[derive(Debug, Default)]
pub struct ScheduleReport {
    pub outcomes: HashMap<String, TaskOutcome>,
    /// Detector names in the order their outcomes were observed
    pub completion_order: Vec<String>,
}

/// Chunk size per sequential family
#[derive(Debug, Clone, Copy)]
pub struct BatchSizes {
    pub context_scan: usize,
    pub ingested_context_scan: usize,
}

impl BatchSizes {
    pub fn get(&self, family: VariableFamily) -> usize {
        match family {
            VariableFamily::ContextScan => self.context_scan,
            VariableFamily::IngestedContextScan => self.ingested_context_scan,
        }
    }
}

pub struct Scheduler {
    invoker: Arc<dyn DetectorInvoker>,
    runner: BatchRunner,
    batch_sizes: BatchSizes,
}

/// Sole path through which outcomes reach the tracker and the report
struct Recorder<'a> {
    tracker: &'a mut ProgressTracker,
    events: &'a mut EventSink,
    report: ScheduleReport,
}

impl Recorder<'_> {
    fn record(&mut self, name: &str, outcome: TaskOutcome) {
        if self.report.outcomes.contains_key(name) {
            tracing::warn!(detector = name, "Duplicate outcome ignored");
            return;
        }
        if self.tracker.on_detector_complete(name, outcome.status()).is_err() {
            return;
        }

        let event = match &outcome {
            TaskOutcome::Success(findings) => self
                .events
                .event(ScanEventKind::DetectorCompleted)
                .with_data(serde_json::json!({ "findings": findings.len() })),
            TaskOutcome::Failure(error) => {
                tracing::warn!(detector = name, "Detector failed: {}", error);
                self.events
                    .event(ScanEventKind::DetectorFailed)
                    .with_data(serde_json::json!({ "error": error.to_string() }))
            }
            TaskOutcome::Skipped(reason) => {
                tracing::info!(detector = name, "Detector skipped: {}", reason);
                self.events
                    .event(ScanEventKind::DetectorSkipped)
                    .with_data(serde_json::json!({ "reason": reason }))
            }
        };
        self.events.emit(event.with_detector(name));

        let progress = self.tracker.progress();
        let event = self
            .events
            .event(ScanEventKind::ProgressUpdated)
            .with_data(serde_json::json!({
                "progress": progress,
                "completed": self.tracker.state().completed_detectors,
                "total": self.tracker.state().total_detectors,
            }));
        self.events.emit(event);

        self.report.completion_order.push(name.to_string());
        self.report.outcomes.insert(name.to_string(), outcome);
    }

    fn chunk_started(&mut self, family: VariableFamily, index: usize, chunk: &[DetectorDescriptor]) {
        let event = self
            .events
            .event(ScanEventKind::BatchStarted)
            .with_data(serde_json::json!({
                "family": family.name(),
                "chunk": index,
                "instances": chunk.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            }));
        self.events.emit(event);
        for desc in chunk {
            let event = self.events.event(ScanEventKind::DetectorStarted);
            self.events.emit(event.with_detector(&desc.name));
        }
    }

    fn chunk_completed(&mut self, family: VariableFamily, index: usize, failed: bool) {
        let event = self
            .events
            .event(ScanEventKind::BatchCompleted)
            .with_data(serde_json::json!({
                "family": family.name(),
                "chunk": index,
                "failed": failed,
            }));
        self.events.emit(event);
    }
}

impl Scheduler {
    pub fn new(invoker: Arc<dyn DetectorInvoker>, batch_sizes: BatchSizes, delay: Duration) -> Self {
        Self {
            invoker,
            runner: BatchRunner::new(delay),
            batch_sizes,
        }
    }

    /// Run every active detector exactly once
    ///
    /// Only the guard firing is fatal; detector failures end up in the report.
    pub async fn run(
        &self,
        plan: &DetectorPlan,
        input: Arc<DetectorInput>,
        prereqs: Prerequisites,
        tracker: &mut ProgressTracker,
        events: &mut EventSink,
        guard: &mut RunGuard,
    ) -> Result<ScheduleReport, ScanError> {
        let mut recorder = Recorder {
            tracker,
            events,
            report: ScheduleReport::default(),
        };

        self.run_parallel(&plan.fixed, &input, prereqs, &mut recorder, guard)
            .await?;

        for family in VariableFamily::ALL {
            self.run_sequential(family, plan.family(family), &input, prereqs, &mut recorder, guard)
                .await?;
        }

        Ok(recorder.report)
    }

    async fn run_parallel(
        &self,
        fixed: &[DetectorDescriptor],
        input: &Arc<DetectorInput>,
        prereqs: Prerequisites,
        recorder: &mut Recorder<'_>,
        guard: &mut RunGuard,
    ) -> Result<(), ScanError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, TaskOutcome)>();
        let mut tasks = Vec::new();

        for desc in fixed {
            let DetectorFamily::Fixed(detector) = desc.family else {
                continue;
            };
            if let Some(reason) = prereqs.gap(detector) {
                recorder.record(&desc.name, TaskOutcome::Skipped(reason));
                continue;
            }

            let event = recorder.events.event(ScanEventKind::DetectorStarted);
            recorder.events.emit(event.with_detector(&desc.name));

            let invoker = Arc::clone(&self.invoker);
            let input = Arc::clone(input);
            let tx = tx.clone();
            let name = desc.name.clone();
            let handle = tokio::spawn(async move {
                let outcome = match invoker.invoke_fixed(detector, &input).await {
                    Ok(findings) => TaskOutcome::Success(findings),
                    Err(e) => TaskOutcome::Failure(DetectorError::execution(format!("{:#}", e))),
                };
                let _ = tx.send((name, outcome));
            });
            tasks.push(DetectorTask {
                name: desc.name.clone(),
                handle,
            });
        }
        // Channel closes once every task has reported or died.
        drop(tx);

        let mut reported = HashSet::new();
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some((name, outcome)) => {
                        reported.insert(name.clone());
                        recorder.record(&name, outcome);
                    }
                    None => break,
                },
                err = guard.cancelled() => {
                    tracing::warn!("Cancelling {} parallel detectors: {}", tasks.len() - reported.len(), err);
                    cancel_all(tasks).await;
                    return Err(err);
                }
            }
        }

        // Tasks that never reported panicked.
        for task in tasks {
            if reported.contains(&task.name) {
                continue;
            }
            let error = match task.handle.await {
                Err(e) if e.is_panic() => DetectorError::Panicked(e.to_string()),
                Err(_) => DetectorError::Cancelled,
                Ok(()) => DetectorError::MissingOutput(task.name.clone()),
            };
            recorder.record(&task.name, TaskOutcome::Failure(error));
        }

        Ok(())
    }

    async fn run_sequential(
        &self,
        family: VariableFamily,
        instances: &[DetectorDescriptor],
        input: &DetectorInput,
        prereqs: Prerequisites,
        recorder: &mut Recorder<'_>,
        guard: &mut RunGuard,
    ) -> Result<(), ScanError> {
        if instances.is_empty() {
            return Ok(());
        }
        if family == VariableFamily::IngestedContextScan && !prereqs.has_ingested_context {
            for desc in instances {
                recorder.record(&desc.name, TaskOutcome::Skipped(SkipReason::MissingIngestedContext));
            }
            return Ok(());
        }

        let batch_size = self.batch_sizes.get(family);
        let event = recorder
            .events
            .event(ScanEventKind::FamilyStarted)
            .with_data(serde_json::json!({
                "family": family.name(),
                "instances": instances.len(),
                "batch_size": batch_size,
            }));
        recorder.events.emit(event);

        let invoker = FamilyInvoker {
            invoker: self.invoker.as_ref(),
            family,
            input,
        };
        let report = {
            let batches = self.runner.run(
                instances,
                batch_size,
                &invoker,
                family.carries_forward(),
                |progress| match progress {
                    BatchProgress::ChunkStarted { index, chunk } => {
                        recorder.chunk_started(family, index, chunk)
                    }
                    BatchProgress::Outcome(desc, outcome) => {
                        recorder.record(&desc.name, outcome.clone())
                    }
                    BatchProgress::ChunkCompleted { index, failed } => {
                        recorder.chunk_completed(family, index, failed)
                    }
                },
            );
            tokio::select! {
                report = batches => report,
                err = guard.cancelled() => {
                    tracing::warn!(family = family.name(), "Sequential family interrupted: {}", err);
                    return Err(err);
                }
            }
        };

        let event = recorder
            .events
            .event(ScanEventKind::FamilyCompleted)
            .with_data(serde_json::json!({
                "family": family.name(),
                "chunks": report.chunks,
                "failed_chunks": report.failed_chunks,
                "findings": report.findings.len(),
            }));
        recorder.events.emit(event);

        Ok(())
    }
}
