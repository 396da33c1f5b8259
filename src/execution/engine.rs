//! `ExecutionEngine::execute_step`: dispatch one step to a Tool or a Skill,
//! gated by the Policy Engine and bracketed by Rollback Tracker snapshots
//! (spec §4.5). Verification clauses (command exit code, file existence,
//! substring-in-output) are evaluated here too, since both the Plan Runner
//! and a top-level single-step invocation need the same semantics.

use super::{ActionDescriptor, ExecutionContext};
use crate::audit::AuditEventKind;
use crate::error::{AgentError, AgentResult};
use crate::permission::{PermissionCategory, RiskLevel};
use crate::policy::{Decision, PolicyEngine};
use crate::rollback::{DiffEntry, RollbackTracker};
use crate::tools::registry::ToolRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// What a step ultimately calls: a registered tool, or a skill run through
/// its own agentic loop. Kept decoupled from the `skills` module (which
/// itself depends on the Tool Registry and Policy Engine) via the
/// `SkillDispatcher` trait below, avoiding a module cycle.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Tool(String),
    Skill(String),
}

/// Everything the engine needs to run one step, independent of whether the
/// caller is the Plan Runner, the Skill Runner's own tool calls, or a
/// single ad hoc invocation.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub step_id: String,
    pub dispatch: Dispatch,
    pub description: String,
    pub inputs: Value,
    pub required_permissions: Vec<PermissionCategory>,
    pub risk_level: RiskLevel,
    /// Filesystem paths this step is expected to touch; bracketed with
    /// `capture_before`/`capture_after` regardless of which paths the tool
    /// actually ends up writing.
    pub rollback_paths: Vec<PathBuf>,
    pub verify: Option<VerifyClause>,
}

/// A verification clause attached to a step (spec §4.6's Verification
/// Engine). `substring` matches against the tool's own textual output field
/// when present, falling back to the JSON-rendered output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum VerifyClause {
    CommandExitCode { command: String, expected: i32 },
    FileExists { path: PathBuf },
    OutputContains { substring: String },
}

/// Object-safe seam letting the Skill Runner be invoked from the engine
/// without the engine depending on `crate::skills`.
#[async_trait]
pub trait SkillDispatcher: Send + Sync {
    async fn run_skill(&self, name: &str, inputs: Value, context: &ExecutionContext) -> AgentResult<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub verification_passed: Option<bool>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub diffs: Vec<DiffEntry>,
}

pub struct ExecutionEngine {
    tools: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    rollback: Arc<RollbackTracker>,
    skills: Option<Arc<dyn SkillDispatcher>>,
}

impl ExecutionEngine {
    pub fn new(tools: Arc<ToolRegistry>, policy: Arc<PolicyEngine>, rollback: Arc<RollbackTracker>) -> Self {
        Self {
            tools,
            policy,
            rollback,
            skills: None,
        }
    }

    pub fn with_skill_dispatcher(mut self, dispatcher: Arc<dyn SkillDispatcher>) -> Self {
        self.skills = Some(dispatcher);
        self
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Build a sibling engine sharing this one's tool registry, rollback
    /// tracker, and skill dispatcher but gated by a different policy —
    /// used to scope a single Plan run to its own allow-lists (spec §3).
    pub fn with_policy(&self, policy: Arc<PolicyEngine>) -> Self {
        Self {
            tools: self.tools.clone(),
            policy,
            rollback: self.rollback.clone(),
            skills: self.skills.clone(),
        }
    }

    pub async fn execute_step(&self, request: StepRequest, context: &ExecutionContext) -> StepOutcome {
        let started = std::time::Instant::now();
        let context = context.clone().with_step(request.step_id.clone());

        let tool_name = match &request.dispatch {
            Dispatch::Tool(name) => name.clone(),
            Dispatch::Skill(name) => format!("skill:{name}"),
        };

        // The action descriptor's permissions come from the tool's own
        // declaration (spec §4.5), not the caller — a step's `StepRequest`
        // only supplies permissions as a fallback for dispatch kinds the
        // registry doesn't know about (e.g. a skill with no matching tool).
        let required_permissions = match &request.dispatch {
            Dispatch::Tool(name) => self
                .tools
                .get(name)
                .map(|tool| tool.required_permissions())
                .unwrap_or_else(|| request.required_permissions.clone()),
            Dispatch::Skill(_) => request.required_permissions.clone(),
        };

        let action = ActionDescriptor {
            tool_name: tool_name.clone(),
            operation: request.step_id.clone(),
            description: request.description.clone(),
            required_permissions,
            arguments: request.inputs.clone(),
            risk_level: request.risk_level,
        };

        context.audit.emit(
            AuditEventKind::StepStart,
            serde_json::json!({"stepId": request.step_id, "tool": tool_name}),
        );

        match self.gate(&action, &context).await {
            Ok(()) => {}
            Err(reason) => {
                return self.finish_failure(&request, started, reason, &context).await;
            }
        }

        if context.dry_run {
            context.audit.emit(
                AuditEventKind::StepComplete,
                serde_json::json!({"stepId": request.step_id, "status": "completed", "dryRun": true}),
            );
            return StepOutcome {
                step_id: request.step_id,
                success: true,
                output: Some(serde_json::json!({"dryRun": true})),
                error: None,
                verification_passed: None,
                duration_ms: started.elapsed().as_millis() as u64,
                diffs: Vec::new(),
            };
        }

        let rollback_paths = self.resolve_rollback_paths(&request, &context);
        for path in &rollback_paths {
            self.rollback.capture_before(&context.step_id.clone().unwrap_or_default(), path).await;
        }

        let dispatch_result = self.dispatch(&request, &context).await;

        let mut diffs = Vec::new();
        for path in &rollback_paths {
            if let Some(diff) = self
                .rollback
                .capture_after(&context.step_id.clone().unwrap_or_default(), path)
                .await
            {
                context.audit.emit(
                    AuditEventKind::DiffGenerated,
                    serde_json::to_value(&diff).unwrap_or(Value::Null),
                );
                diffs.push(diff);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        match dispatch_result {
            Ok(output) => {
                let verification = match &request.verify {
                    Some(clause) => Some(self.verify(clause, &output, &context).await),
                    None => None,
                };
                let verification_passed = verification.as_ref().map(|(passed, _)| *passed);
                let success = verification_passed != Some(false);
                context.audit.emit(
                    if success {
                        AuditEventKind::StepComplete
                    } else {
                        AuditEventKind::StepFailed
                    },
                    serde_json::json!({
                        "stepId": request.step_id,
                        "status": if success { "completed" } else { "failed" },
                        "durationMs": duration_ms,
                        "verificationPassed": verification_passed,
                    }),
                );
                StepOutcome {
                    step_id: request.step_id,
                    success,
                    output: Some(output),
                    // Spec §4.6 step 7: a failing verification's details become
                    // the step's error, not a generic placeholder.
                    error: if success {
                        None
                    } else {
                        verification.map(|(_, details)| details)
                    },
                    verification_passed,
                    duration_ms,
                    diffs,
                }
            }
            Err(err) => {
                context.audit.emit(
                    AuditEventKind::StepFailed,
                    serde_json::json!({
                        "stepId": request.step_id,
                        "status": "failed",
                        "error": err.to_string(),
                        "durationMs": duration_ms,
                    }),
                );
                StepOutcome {
                    step_id: request.step_id,
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                    verification_passed: None,
                    duration_ms,
                    diffs,
                }
            }
        }
    }

    async fn finish_failure(
        &self,
        request: &StepRequest,
        started: std::time::Instant,
        reason: String,
        context: &ExecutionContext,
    ) -> StepOutcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        context.audit.emit(
            AuditEventKind::StepFailed,
            serde_json::json!({
                "stepId": request.step_id,
                "status": "failed",
                "error": reason,
                "durationMs": duration_ms,
            }),
        );
        StepOutcome {
            step_id: request.step_id.clone(),
            success: false,
            output: None,
            error: Some(reason),
            verification_passed: None,
            duration_ms,
            diffs: Vec::new(),
        }
    }

    /// Paths to bracket with `capture_before`/`capture_after`: any the step
    /// declared explicitly, plus — for a dispatch whose tool name begins
    /// with `fs.` and whose arguments carry a `path` — that path, resolved
    /// against the run's working directory (spec §4.5 step 4). A step never
    /// has to repeat the path it already passed as a tool argument.
    fn resolve_rollback_paths(&self, request: &StepRequest, context: &ExecutionContext) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = request
            .rollback_paths
            .iter()
            .map(|path| context.working_dir.join(path))
            .collect();
        if let Dispatch::Tool(name) = &request.dispatch {
            if name.starts_with("fs.") {
                if let Some(path) = request.inputs.get("path").and_then(Value::as_str) {
                    let resolved = context.working_dir.join(path);
                    if !paths.contains(&resolved) {
                        paths.push(resolved);
                    }
                }
            }
        }
        paths
    }

    /// Returns `Ok(())` if the action may proceed, or `Err(reason)` if it
    /// was denied outright or approval was requested and refused.
    async fn gate(&self, action: &ActionDescriptor, context: &ExecutionContext) -> Result<(), String> {
        match self.policy.check(action, context).await {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => Err(reason),
            Decision::NeedsApproval(reason) => {
                if self.policy.request_approval(action, context).await {
                    Ok(())
                } else {
                    Err(reason)
                }
            }
        }
    }

    async fn dispatch(&self, request: &StepRequest, context: &ExecutionContext) -> AgentResult<Value> {
        match &request.dispatch {
            Dispatch::Tool(name) => {
                let result = self.tools.execute(name, request.inputs.clone(), context).await;
                match result.output {
                    Some(output) if result.success => Ok(output),
                    _ => Err(result.error.unwrap_or_else(|| AgentError::ToolNotFound(name.clone()))),
                }
            }
            Dispatch::Skill(name) => {
                let Some(dispatcher) = &self.skills else {
                    return Err(AgentError::SkillNotFound(name.clone()));
                };
                dispatcher.run_skill(name, request.inputs.clone(), context).await
            }
        }
    }

    /// Evaluates one verification clause. Returns `(passed, details)` — the
    /// details describe the outcome either way (spec §4.5: "returns (passed,
    /// details_text)") and become the step's error on failure (§4.6 step 7).
    async fn verify(&self, clause: &VerifyClause, output: &Value, context: &ExecutionContext) -> (bool, String) {
        match clause {
            VerifyClause::FileExists { path } => {
                let exists = tokio::fs::metadata(context.working_dir.join(path)).await.is_ok();
                let details = if exists {
                    format!("file exists: {}", path.display())
                } else {
                    format!("file does not exist: {}", path.display())
                };
                (exists, details)
            }
            VerifyClause::CommandExitCode { command, expected } => {
                let result = self
                    .tools
                    .execute(
                        "cmd.run",
                        serde_json::json!({"command": command}),
                        context,
                    )
                    .await;
                let actual_exit = result
                    .output
                    .as_ref()
                    .and_then(|v| v.get("exitCode"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(-1);
                let passed = result.success && actual_exit == *expected as i64;
                let details = format!("command {command:?} exited {actual_exit}, expected {expected}");
                (passed, details)
            }
            VerifyClause::OutputContains { substring } => {
                let text = output
                    .get("stdout")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| output.to_string());
                let passed = text.contains(substring.as_str());
                let details = if passed {
                    format!("output contains {substring:?}")
                } else {
                    format!("output does not contain {substring:?}: {text:?}")
                };
                (passed, details)
            }
        }
    }
}
