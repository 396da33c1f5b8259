//! Audit Bus + Audit Logger.
//!
//! The teacher's source uses a single process-wide event emitter
//! (`orchestrator`/`tool_policy` style globals); design notes flag that as
//! unsafe for concurrent runs. Here each run owns its own unbounded
//! `tokio::mpsc` channel: tools and the Policy Engine emit into the
//! `AuditSink` carried by their `ExecutionContext`, never into a global.

mod logger;

pub use logger::{AuditLogger, RunLog, RunSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    RunStart,
    RunComplete,
    StepStart,
    StepComplete,
    StepFailed,
    ToolCall,
    ToolResult,
    PermissionCheck,
    PermissionDenied,
    ApprovalGranted,
    ApprovalDenied,
    SkillLoaded,
    DiffGenerated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}

/// Per-run handle for emitting events. Cheap to clone; every clone shares
/// the same underlying channel so fan-out (tool calls overlapping with
/// model calls, §5) never races on a shared mutable bus.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditSink {
    pub fn emit(&self, kind: AuditEventKind, payload: Value) {
        // A closed receiver (logger already finalized) just drops the event;
        // emission must never be allowed to fail a step.
        let _ = self.tx.send(AuditEvent::new(kind, payload));
    }
}

/// Create a fresh per-run channel: a sink for emitters and a receiver for
/// the `AuditLogger` that will aggregate this run's events.
pub fn channel() -> (AuditSink, mpsc::UnboundedReceiver<AuditEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AuditSink { tx }, rx)
}
