//! Rollback Tracker: before/after snapshots and unified patch generation.
//!
//! Keyed on `(step_id, path)` with single pre-snapshot semantics (design
//! notes §9 flag this as unable to represent moves/renames — out of scope
//! here, same as the teacher's diff preview utilities which only ever
//! compare two whole-file strings).

use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One captured mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: PathBuf,
    pub before: String,
    pub after: String,
    pub patch: String,
    pub step_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

fn unified_patch(path: &Path, before: &str, after: &str) -> String {
    let old_label = format!("a/{}", path.display());
    let new_label = format!("b/{}", path.display());
    TextDiff::from_lines(before, after)
        .unified_diff()
        .header(&old_label, &new_label)
        .to_string()
}

struct StepBucket {
    /// First write wins: preserves the true pre-state across repeated
    /// writes to the same path inside one step.
    pre: HashMap<PathBuf, String>,
    /// Tracks paths already diffed so a later `capture_after` for the same
    /// path does not append a second Diff Entry.
    diffed: std::collections::HashSet<PathBuf>,
}

pub struct RollbackTracker {
    buckets: Mutex<HashMap<String, StepBucket>>,
    step_order: Mutex<Vec<String>>,
    diffs: Mutex<Vec<DiffEntry>>,
}

impl Default for RollbackTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackTracker {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            step_order: Mutex::new(Vec::new()),
            diffs: Mutex::new(Vec::new()),
        }
    }

    /// Resolve + read the current content, or record an empty string if the
    /// file doesn't exist yet. Idempotent per `(step_id, path)`.
    pub async fn capture_before(&self, step_id: &str, path: &Path) {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(step_id.to_string()).or_insert_with(|| StepBucket {
            pre: HashMap::new(),
            diffed: std::collections::HashSet::new(),
        });
        bucket.pre.entry(path.to_path_buf()).or_insert(content);
        drop(buckets);

        let mut order = self.step_order.lock().await;
        if !order.iter().any(|s| s == step_id) {
            order.push(step_id.to_string());
        }
    }

    /// Read the post-mutation content; if it differs from the captured
    /// pre-state, append a Diff Entry. A step that wrote the same path N
    /// times still yields exactly one entry (net diff).
    pub async fn capture_after(&self, step_id: &str, path: &Path) -> Option<DiffEntry> {
        let after = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.get_mut(step_id)?;
        if bucket.diffed.contains(path) {
            return None;
        }
        let before = bucket.pre.get(path).cloned().unwrap_or_default();
        if before == after {
            return None;
        }
        bucket.diffed.insert(path.to_path_buf());
        let entry = DiffEntry {
            path: path.to_path_buf(),
            patch: unified_patch(path, &before, &after),
            before,
            after,
            step_id: step_id.to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.diffs.lock().await.push(entry.clone());
        Some(entry)
    }

    /// Write every `(path -> pre-content)` for this step back to disk, in
    /// unspecified order. Returns the restored paths.
    pub async fn rollback_step(&self, step_id: &str) -> Vec<PathBuf> {
        let buckets = self.buckets.lock().await;
        let Some(bucket) = buckets.get(step_id) else {
            return Vec::new();
        };
        let mut restored = Vec::new();
        for (path, content) in &bucket.pre {
            if content.is_empty() {
                let _ = tokio::fs::remove_file(path).await;
            } else if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
                let _ = tokio::fs::write(path, content).await;
            }
            restored.push(path.clone());
        }
        restored
    }

    /// Iterates step ids in reverse insertion order, rolling each back.
    pub async fn rollback_all(&self) -> Vec<PathBuf> {
        let order = self.step_order.lock().await.clone();
        let mut restored = Vec::new();
        for step_id in order.into_iter().rev() {
            restored.extend(self.rollback_step(&step_id).await);
        }
        restored
    }

    pub async fn diffs(&self) -> Vec<DiffEntry> {
        self.diffs.lock().await.clone()
    }

    /// Concatenation of every captured unified patch, newline-delimited.
    pub async fn export_patches(&self) -> String {
        self.diffs
            .lock()
            .await
            .iter()
            .map(|d| d.patch.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
