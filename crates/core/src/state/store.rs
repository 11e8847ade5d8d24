//! # Scan Record Store
//!
//! Narrow save/load interface the engine persists through, and its SQLite
//! implementation.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::db::ScanDb;
use super::record::{RunSummary, ScanRecord, ScanResult};
use super::scan_state::ScanState;
use crate::findings::Finding;

/// Persistence boundary consumed by the orchestrator
///
/// Failures are treated as fatal for the single call only; the engine logs
/// them and keeps running on its in-memory state.
pub trait ScanStore: Send + Sync {
    /// Load the stored record for a scan
    fn load(&self, scan_id: &str) -> Result<ScanRecord>;

    /// Upsert the latest state of a scan
    fn save_progress(&self, state: &ScanState) -> Result<()>;

    /// Store the final result of a scan
    fn save_result(&self, result: &ScanResult) -> Result<()>;

    /// Latest state of every stored scan, most recently updated first
    fn list(&self) -> Result<Vec<ScanState>>;
}

/// [`ScanStore`] backed by the Vigil SQLite database
pub struct SqliteScanStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteScanStore {
    pub fn new(db: &ScanDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl ScanStore for SqliteScanStore {
    fn load(&self, scan_id: &str) -> Result<ScanRecord> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let state_json: String = conn
            .query_row(
                "SELECT state_json FROM scans WHERE id = ?1",
                params![scan_id],
                |row| row.get(0),
            )
            .with_context(|| format!("Scan '{}' not found", scan_id))?;
        let state: ScanState = serde_json::from_str(&state_json)?;

        let row: Option<(String, String, String, Option<String>)> = conn
            .query_row(
                r#"
                SELECT findings_json, by_detector_json, summary_json, detected_profile
                FROM scan_results WHERE scan_id = ?1
                "#,
                params![scan_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let result = match row {
            Some((findings, by_detector, summary, detected_profile)) => {
                let findings: Vec<Finding> = serde_json::from_str(&findings)?;
                let findings_by_detector: BTreeMap<String, Vec<Finding>> =
                    serde_json::from_str(&by_detector)?;
                let summary: RunSummary = serde_json::from_str(&summary)?;
                Some(ScanResult {
                    scan_id: scan_id.to_string(),
                    findings,
                    findings_by_detector,
                    summary,
                    detected_profile,
                })
            }
            None => None,
        };

        Ok(ScanRecord { state, result })
    }

    fn save_progress(&self, state: &ScanState) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data = serde_json::to_string(state)?;
        conn.execute(
            r#"
            INSERT INTO scans (id, kind, stage, progress, state_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                stage = ?3,
                progress = ?4,
                state_json = ?5,
                updated_at = ?7
            "#,
            params![
                state.scan_id,
                state.kind.as_str(),
                state.stage.as_str(),
                state.progress,
                data,
                state.created_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to save scan state")?;

        Ok(())
    }

    fn save_result(&self, result: &ScanResult) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO scan_results
                (scan_id, findings_json, by_detector_json, summary_json, detected_profile, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                result.scan_id,
                serde_json::to_string(&result.findings)?,
                serde_json::to_string(&result.findings_by_detector)?,
                serde_json::to_string(&result.summary)?,
                result.detected_profile,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to save scan result")?;

        Ok(())
    }

    fn list(&self) -> Result<Vec<ScanState>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare("SELECT state_json FROM scans ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut states = Vec::new();
        for row in rows {
            states.push(serde_json::from_str(&row?)?);
        }
        Ok(states)
    }
}
