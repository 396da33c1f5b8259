//! Per-run on-disk audit record.

use super::{AuditEvent, AuditEventKind};
use crate::rollback::DiffEntry;
use crate::secrets::redact;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    pub status: String,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub verification_passed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub files_changed: usize,
    pub duration_ms: u64,
    pub verifications_passed: usize,
    pub verifications_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub plan_name: String,
    pub status: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub events: Vec<AuditEvent>,
    pub steps: Vec<StepRecord>,
    pub diffs: Vec<DiffEntry>,
    pub summary: RunSummary,
}

impl RunLog {
    fn new(run_id: String, plan_name: String) -> Self {
        Self {
            run_id,
            plan_name,
            status: "running".to_string(),
            start: Utc::now(),
            end: None,
            events: Vec::new(),
            steps: Vec::new(),
            diffs: Vec::new(),
            summary: RunSummary::default(),
        }
    }
}

/// Subscribes to a run's Audit Bus receiver for the run's lifetime,
/// aggregating events, step records and diffs into a `RunLog`.
pub struct AuditLogger {
    run_dir: PathBuf,
    log: RunLog,
    rx: UnboundedReceiver<AuditEvent>,
}

impl AuditLogger {
    pub fn new(runs_root: &Path, run_id: impl Into<String>, plan_name: impl Into<String>, rx: UnboundedReceiver<AuditEvent>) -> Self {
        let run_id = run_id.into();
        let run_dir = runs_root.join(&run_id);
        Self {
            run_dir,
            log: RunLog::new(run_id, plan_name.into()),
            rx,
        }
    }

    /// Drain every event currently buffered on the channel without blocking.
    /// Call periodically (e.g. after each step) so the in-memory log stays
    /// current even while the run is in flight.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.ingest(&event);
            self.log.events.push(event);
        }
    }

    fn ingest(&mut self, event: &AuditEvent) {
        match event.kind {
            AuditEventKind::StepComplete | AuditEventKind::StepFailed => {
                if let Ok(record) = serde_json::from_value::<StepRecord>(event.payload.clone()) {
                    self.log.steps.push(record);
                }
            }
            AuditEventKind::DiffGenerated => {
                if let Ok(diff) = serde_json::from_value::<DiffEntry>(event.payload.clone()) {
                    self.log.diffs.push(diff);
                }
            }
            _ => {}
        }
    }

    /// Stamp the end time, compute the run summary, and persist both the
    /// run log and the diffs file to `.agent/runs/<runId>/`.
    pub async fn complete(&mut self, status: &str) -> Result<()> {
        self.drain();
        self.log.status = status.to_string();
        self.log.end = Some(Utc::now());

        let duration_ms = self
            .log
            .end
            .and_then(|end| (end - self.log.start).num_milliseconds().try_into().ok())
            .unwrap_or(0);

        let mut summary = RunSummary {
            duration_ms,
            ..Default::default()
        };
        let mut changed_paths = std::collections::HashSet::new();
        for step in &self.log.steps {
            match step.status.as_str() {
                "completed" => summary.steps_completed += 1,
                "failed" => summary.steps_failed += 1,
                "skipped" => summary.steps_skipped += 1,
                _ => {}
            }
            match step.verification_passed {
                Some(true) => summary.verifications_passed += 1,
                Some(false) => summary.verifications_failed += 1,
                None => {}
            }
        }
        for diff in &self.log.diffs {
            changed_paths.insert(diff.path.clone());
        }
        summary.files_changed = changed_paths.len();
        self.log.summary = summary;

        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.run_dir)
            .await
            .context("failed to create run directory")?;

        let run_json = serde_json::to_string_pretty(&self.log).context("serialize run log")?;
        let run_json = redact(&run_json);
        tokio::fs::write(self.run_dir.join("run.json"), run_json)
            .await
            .context("write run.json")?;

        let diffs_json = serde_json::to_string_pretty(&self.log.diffs).context("serialize diffs")?;
        let diffs_json = redact(&diffs_json);
        tokio::fs::write(self.run_dir.join("diffs.json"), diffs_json)
            .await
            .context("write diffs.json")?;

        Ok(())
    }

    pub fn run_log(&self) -> &RunLog {
        &self.log
    }

    /// Load a previously persisted run log from `<runs_root>/<run_id>/run.json`.
    pub async fn load(runs_root: &Path, run_id: &str) -> Option<RunLog> {
        let path = runs_root.join(run_id).join("run.json");
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// All run ids under `runs_root`, reverse chronological. Relies on the
    /// timestamp prefix in `run-<rfc3339>-<uuid>` sorting lexicographically
    /// the same as chronologically; the uuid suffix only breaks ties.
    pub async fn list(runs_root: &Path) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(runs_root).await else {
            return ids;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(name) = entry.file_name().into_string() {
                ids.push(name);
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        ids
    }
}
