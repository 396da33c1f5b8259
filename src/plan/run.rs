//! Plan-run bookkeeping types: what the Plan Runner accumulates as it
//! walks a Plan's steps.

use crate::rollback::DiffEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRunRecord {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub verification_passed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanRunStatus {
    /// A `mode: propose` plan's run record, materialized without having
    /// executed any step (spec §4.7). Re-approvable, not re-mutable.
    Proposed,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRun {
    pub run_id: String,
    pub plan_name: String,
    pub status: PlanRunStatus,
    pub steps: Vec<StepRunRecord>,
    pub diffs: Vec<DiffEntry>,
}

impl PlanRun {
    pub fn step(&self, id: &str) -> Option<&StepRunRecord> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}
