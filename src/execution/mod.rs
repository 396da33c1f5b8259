//! Execution Engine: dispatches one Plan Step to a Tool or Skill, gated by
//! the Policy Engine and bracketed by Rollback hooks (spec §4.5).

pub mod engine;

pub use engine::{Dispatch, ExecutionEngine, StepOutcome, StepRequest, VerifyClause};

use crate::audit::AuditSink;
use crate::config::ConfigSnapshot;
use crate::permission::PermissionCategory;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Descriptor of a proposed action, passed to the Policy Engine.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub tool_name: String,
    pub operation: String,
    pub description: String,
    pub required_permissions: Vec<PermissionCategory>,
    pub arguments: serde_json::Value,
    pub risk_level: crate::permission::RiskLevel,
}

/// Injected by the front-end to ask a human whether an action may proceed.
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn prompt(&self, action: &ActionDescriptor) -> bool;
}

/// Injected by the front-end to receive incremental progress text.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Per-invocation record threaded through every subsystem. Owns its own
/// session-approval set so concurrent runs never share mutable policy
/// state (§5 Shared resources).
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub step_id: Option<String>,
    pub working_dir: PathBuf,
    pub config: Arc<ConfigSnapshot>,
    pub dry_run: bool,
    pub autonomous: bool,
    approved: Arc<Mutex<HashSet<(String, PermissionCategory)>>>,
    pub approval_prompter: Option<Arc<dyn ApprovalPrompter>>,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub audit: AuditSink,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, working_dir: PathBuf, config: Arc<ConfigSnapshot>, audit: AuditSink) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: None,
            working_dir,
            config,
            dry_run: false,
            autonomous: false,
            approved: Arc::new(Mutex::new(HashSet::new())),
            approval_prompter: None,
            progress: None,
            audit,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_approval_prompter(mut self, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        self.approval_prompter = Some(prompter);
        self
    }

    pub async fn is_approved(&self, tool_name: &str, permission: PermissionCategory) -> bool {
        let approved = self.approved.lock().await;
        approved.contains(&(tool_name.to_string(), permission))
    }

    pub async fn cache_approval(&self, tool_name: &str, permission: PermissionCategory) {
        let mut approved = self.approved.lock().await;
        approved.insert((tool_name.to_string(), permission));
    }

    /// Clearing a run's context clears its approvals (invariant, §3).
    pub async fn clear_approvals(&self) {
        let mut approved = self.approved.lock().await;
        approved.clear();
    }
}
