//! # Scan Events
//!
//! Event stream emitted by the orchestrator while a scan runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of scan event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanEventKind {
    ScanStarted,
    /// A new stage of the run began
    StageStarted,
    /// A pre-processing step finished (ok or degraded)
    StepCompleted,
    DetectorStarted,
    DetectorCompleted,
    DetectorFailed,
    /// Prerequisites missing, detector never invoked
    DetectorSkipped,
    /// A sequential detector family began its chunked run
    FamilyStarted,
    FamilyCompleted,
    /// One chunk of a sequential family was handed to the invoker
    BatchStarted,
    BatchCompleted,
    ProgressUpdated,
    ScanCompleted,
    ScanFailed,
}

/// An event in the scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ScanEventKind,
    pub scan_id: String,
    /// Detector the event is about, if any
    #[serde(default)]
    pub detector: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ScanEvent {
    pub fn new(kind: ScanEventKind, scan_id: &str) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            kind,
            scan_id: scan_id.to_string(),
            detector: None,
            data: None,
        }
    }

    pub fn with_detector(mut self, detector: &str) -> Self {
        self.detector = Some(detector.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Records events for the run and forwards them to an optional listener
#[derive(Debug)]
pub struct EventSink {
    scan_id: String,
    tx: Option<mpsc::Sender<ScanEvent>>,
    events: Vec<ScanEvent>,
}

impl EventSink {
    pub fn new(scan_id: &str, tx: Option<mpsc::Sender<ScanEvent>>) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            tx,
            events: Vec::new(),
        }
    }

    /// Start an event for this scan
    pub fn event(&self, kind: ScanEventKind) -> ScanEvent {
        ScanEvent::new(kind, &self.scan_id)
    }

    /// Never blocks: a full or closed listener only loses the live copy.
    pub fn emit(&mut self, event: ScanEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event.clone()) {
                tracing::debug!("Scan event not delivered: {}", e);
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[ScanEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ScanEvent> {
        self.events
    }
}

/// Time-ordered, process-unique event id
fn event_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let millis = Utc::now().timestamp_millis();
    format!("{:x}-{:x}", millis, SEQ.fetch_add(1, Ordering::Relaxed))
}
