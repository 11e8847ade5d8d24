//! # Iterative Batch Runner
//!
//! Runs a sequential family of detector instances in fixed-size chunks.
//! Chunk `i + 1` never starts before chunk `i` resolves, so families that
//! carry findings forward always see the deduplicated union of everything
//! earlier chunks reported.

use std::time::Duration;

use super::detectors::DetectorDescriptor;
use super::interfaces::BatchInvoker;
use super::outcome::TaskOutcome;
use crate::error::DetectorError;
use crate::findings::{Finding, FindingSet};

/// Outcomes of one family run, in completion order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, TaskOutcome)>,
    /// Deduplicated union of every successful chunk's findings
    pub findings: FindingSet,
    pub chunks: usize,
    pub failed_chunks: usize,
}

/// What the runner reports while a family is in flight
#[derive(Debug)]
pub enum BatchProgress<'a> {
    ChunkStarted {
        index: usize,
        chunk: &'a [DetectorDescriptor],
    },
    /// One instance resolved; fired before the chunk completes
    Outcome(&'a DetectorDescriptor, &'a TaskOutcome),
    ChunkCompleted {
        index: usize,
        failed: bool,
    },
}

pub struct BatchRunner {
    delay: Duration,
}

impl BatchRunner {
    /// `delay` is the pause inserted between consecutive chunks
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run `instances` in chunks of at most `batch_size`
    ///
    /// `on_progress` sees each chunk start, every instance outcome as soon as
    /// its chunk resolves, and each chunk completion.
    pub async fn run<F>(
        &self,
        instances: &[DetectorDescriptor],
        batch_size: usize,
        invoker: &dyn BatchInvoker,
        carry_forward: bool,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(BatchProgress<'_>),
    {
        let mut report = BatchReport::default();

        for (index, chunk) in instances.chunks(batch_size.max(1)).enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let prior: &[Finding] = if carry_forward {
                report.findings.as_slice()
            } else {
                &[]
            };
            tracing::debug!(
                chunk = index,
                size = chunk.len(),
                prior_findings = prior.len(),
                "Invoking detector chunk"
            );
            on_progress(BatchProgress::ChunkStarted { index, chunk });

            let mut failed = false;
            let outcomes: Vec<TaskOutcome> = match invoker.invoke(chunk, prior).await {
                Ok(mut by_instance) => {
                    let outcomes = chunk
                        .iter()
                        .map(|desc| match by_instance.remove(&desc.name) {
                            Some(findings) => {
                                report.findings.extend(findings.iter().cloned());
                                TaskOutcome::Success(findings)
                            }
                            None => TaskOutcome::Failure(DetectorError::MissingOutput(
                                desc.name.clone(),
                            )),
                        })
                        .collect();
                    if !by_instance.is_empty() {
                        tracing::warn!(
                            chunk = index,
                            unexpected = ?by_instance.keys().collect::<Vec<_>>(),
                            "Chunk returned findings for instances outside the chunk"
                        );
                    }
                    outcomes
                }
                Err(e) => {
                    // The chunk fails atomically.
                    tracing::warn!(chunk = index, "Detector chunk failed: {:#}", e);
                    report.failed_chunks += 1;
                    failed = true;
                    let error = DetectorError::execution(format!("{:#}", e));
                    chunk
                        .iter()
                        .map(|_| TaskOutcome::Failure(error.clone()))
                        .collect()
                }
            };

            for (desc, outcome) in chunk.iter().zip(outcomes) {
                on_progress(BatchProgress::Outcome(desc, &outcome));
                report.outcomes.push((desc.name.clone(), outcome));
            }
            on_progress(BatchProgress::ChunkCompleted { index, failed });
            report.chunks += 1;
        }

        report
    }
}
