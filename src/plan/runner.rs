//! Plan Runner: walks a Plan's steps in declaration order, honoring
//! `dependsOn`, retrying/skipping/aborting per each step's own failure
//! policy, and handing each step to the Execution Engine (spec §4.6).

use super::run::{PlanRun, PlanRunStatus, StepRunRecord, StepStatus};
use super::{ApprovalMode, FailurePolicy, Plan, PlanMode};
use crate::audit::AuditEventKind;
use crate::execution::{ActionDescriptor, Dispatch, ExecutionContext, ExecutionEngine, StepRequest};
use crate::policy::Decision;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct PlanRunner {
    engine: Arc<ExecutionEngine>,
}

impl PlanRunner {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// `policy.approvals: pre_approve` (spec §6): resolve every step's
    /// confirm-gated permissions once, up front, so the per-step gate
    /// inside `execute_step` finds a cached session approval and never
    /// prompts mid-run.
    async fn pre_approve_all(&self, engine: &ExecutionEngine, plan: &Plan, context: &ExecutionContext) {
        for step in &plan.steps {
            let Some(tool_name) = &step.tool else { continue };
            let Some(tool) = engine.tools().get(tool_name) else {
                continue;
            };
            let action = ActionDescriptor {
                tool_name: tool_name.clone(),
                operation: step.id.clone(),
                description: step.description.clone(),
                required_permissions: tool.required_permissions(),
                arguments: step.inputs.clone(),
                risk_level: step.risk_level,
            };
            if let Decision::NeedsApproval(_) = engine.policy().check(&action, context).await {
                engine.policy().request_approval(&action, context).await;
            }
        }
    }

    pub async fn run(&self, plan: &Plan, context: &ExecutionContext) -> PlanRun {
        if plan.mode == PlanMode::Propose {
            return PlanRun {
                run_id: context.run_id.clone(),
                plan_name: plan.name.clone(),
                status: PlanRunStatus::Proposed,
                steps: Vec::new(),
                diffs: Vec::new(),
            };
        }

        let scoped_policy = self
            .engine
            .policy()
            .with_additional_scope(&plan.policy.filesystem_allowlist, &plan.policy.command_allowlist);
        let engine = self.engine.with_policy(Arc::new(scoped_policy));
        let context = if plan.policy.approvals == ApprovalMode::Auto {
            context.clone().with_autonomous(true)
        } else {
            context.clone()
        };
        let context = &context;

        if plan.policy.approvals == ApprovalMode::PreApprove {
            self.pre_approve_all(&engine, plan, context).await;
        }

        context.audit.emit(
            AuditEventKind::RunStart,
            serde_json::json!({
                "runId": context.run_id,
                "planName": plan.name,
                "stepCount": plan.steps.len(),
            }),
        );

        let mut completed: HashSet<String> = HashSet::new();
        let mut records: Vec<StepRunRecord> = Vec::new();
        let mut diffs = Vec::new();
        let mut aborted = false;

        for step in &plan.steps {
            if aborted {
                records.push(StepRunRecord {
                    step_id: step.id.clone(),
                    status: StepStatus::Skipped,
                    attempts: 0,
                    output: None,
                    error: Some("run aborted before this step".to_string()),
                    verification_passed: None,
                });
                continue;
            }

            let unmet: Vec<&String> = step
                .depends_on
                .iter()
                .filter(|dep| !completed.contains(dep.as_str()))
                .collect();
            if !unmet.is_empty() {
                records.push(StepRunRecord {
                    step_id: step.id.clone(),
                    status: StepStatus::Skipped,
                    attempts: 0,
                    output: None,
                    error: Some(format!(
                        "unmet dependencies: {}",
                        unmet.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    )),
                    verification_passed: None,
                });
                continue;
            }

            let dispatch = match (&step.tool, &step.skill) {
                (Some(tool), _) => Dispatch::Tool(tool.clone()),
                (None, Some(skill)) => Dispatch::Skill(skill.clone()),
                (None, None) => unreachable!("Plan::validate rejects steps with neither target"),
            };

            // Only `onFailure: retry` ever re-invokes a step; the other two
            // policies run it exactly once (spec §6: `retries` is consulted
            // only under the `retry` policy).
            let max_attempts = if step.on_failure == FailurePolicy::Retry {
                step.retries.saturating_add(1)
            } else {
                1
            };
            let mut attempts = 0;
            let mut outcome = None;

            while attempts < max_attempts {
                attempts += 1;
                let request = StepRequest {
                    step_id: step.id.clone(),
                    dispatch: dispatch.clone(),
                    description: step.description.clone(),
                    inputs: step.inputs.clone(),
                    required_permissions: Vec::new(),
                    risk_level: step.risk_level,
                    rollback_paths: step.rollback_paths.clone(),
                    verify: step.verify.clone(),
                };
                let result = engine.execute_step(request, context).await;
                let succeeded = result.success;
                outcome = Some(result);
                if succeeded {
                    break;
                }
                if attempts < max_attempts && step.retry_backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(step.retry_backoff_ms)).await;
                }
            }

            let outcome = outcome.expect("loop runs at least once since max_attempts >= 1");
            diffs.extend(outcome.diffs.clone());

            if outcome.success {
                completed.insert(step.id.clone());
                records.push(StepRunRecord {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    attempts,
                    output: outcome.output,
                    error: None,
                    verification_passed: outcome.verification_passed,
                });
                continue;
            }

            // A step that exhausts its retries is always `failed` (spec
            // §4.6 step 6: "skip: leave as failed but continue"); `skip`
            // vs `abort` differ only in whether the run keeps going
            // afterward, not in the failing step's own status. Only an
            // unmet-dependency step (above) is ever marked `skipped`.
            records.push(StepRunRecord {
                step_id: step.id.clone(),
                status: StepStatus::Failed,
                attempts,
                output: outcome.output,
                error: outcome.error,
                verification_passed: outcome.verification_passed,
            });
            // `skip` is the only policy that lets the loop keep going past a
            // failed step; `abort` stops it, and `retry` exhausting its
            // attempts without success falls back to the same conservative
            // `abort` behavior since there's nothing left to retry with.
            match step.on_failure {
                FailurePolicy::Skip => {}
                FailurePolicy::Abort | FailurePolicy::Retry => aborted = true,
            }
        }

        let status = if aborted {
            PlanRunStatus::Aborted
        } else if records.iter().any(|r| r.status == StepStatus::Failed) {
            PlanRunStatus::Failed
        } else {
            PlanRunStatus::Completed
        };

        context.audit.emit(
            AuditEventKind::RunComplete,
            serde_json::json!({
                "runId": context.run_id,
                "planName": plan.name,
                "status": format!("{status:?}"),
            }),
        );

        PlanRun {
            run_id: context.run_id.clone(),
            plan_name: plan.name.clone(),
            status,
            steps: records,
            diffs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApprovalDefault, ConfigSnapshot};
    use crate::policy::PolicyEngine;
    use crate::rollback::RollbackTracker;
    use crate::tools::builtin::{FsExistsTool, FsWriteTool};
    use crate::tools::registry::ToolRegistry;
    use std::time::Duration as StdDuration;

    fn build_engine(config: Arc<ConfigSnapshot>) -> Arc<ExecutionEngine> {
        let mut registry = ToolRegistry::new(vec!["*".to_string()], StdDuration::from_secs(5));
        registry.register(Arc::new(FsWriteTool)).expect("register");
        registry.register(Arc::new(FsExistsTool)).expect("register");
        let policy = Arc::new(PolicyEngine::new(config));
        let rollback = Arc::new(RollbackTracker::new());
        Arc::new(ExecutionEngine::new(Arc::new(registry), policy, rollback))
    }

    fn context_at(root: &std::path::Path, config: Arc<ConfigSnapshot>) -> ExecutionContext {
        let (sink, _rx) = crate::audit::channel();
        ExecutionContext::new("run-1", root.to_path_buf(), config, sink).with_autonomous(true)
    }

    #[tokio::test]
    async fn dependent_step_is_skipped_when_upstream_fails_under_skip_policy() {
        let mut config = ConfigSnapshot::default();
        config.policy.rules = vec![crate::config::PolicyRule {
            permission: "filesystem.write".to_string(),
            action: ApprovalDefault::Deny,
        }];
        let config = Arc::new(config);
        let engine = build_engine(config.clone());
        let runner = PlanRunner::new(engine);

        let dir = tempfile::tempdir().expect("tempdir");
        let context = context_at(dir.path(), config);

        let yaml = r#"
name: chain
steps:
  - id: write
    description: write a file
    tool: fs.write
    onFailure: skip
    inputs:
      path: a.txt
      content: hi
  - id: check
    description: check it exists
    tool: fs.exists
    dependsOn: [write]
    inputs:
      path: a.txt
"#;
        let plan = Plan::parse(yaml).expect("parse");
        let run = runner.run(&plan, &context).await;

        assert_eq!(run.step("write").expect("write record").status, StepStatus::Failed);
        assert_eq!(run.step("check").expect("check record").status, StepStatus::Skipped);
        assert_eq!(run.status, PlanRunStatus::Failed);
    }

    #[tokio::test]
    async fn abort_policy_skips_all_subsequent_steps() {
        let mut config = ConfigSnapshot::default();
        config.policy.rules = vec![crate::config::PolicyRule {
            permission: "filesystem.write".to_string(),
            action: ApprovalDefault::Deny,
        }];
        let config = Arc::new(config);
        let engine = build_engine(config.clone());
        let runner = PlanRunner::new(engine);

        let dir = tempfile::tempdir().expect("tempdir");
        let context = context_at(dir.path(), config);

        let yaml = r#"
name: chain
steps:
  - id: write
    description: write a file
    tool: fs.write
    onFailure: abort
    inputs:
      path: a.txt
      content: hi
  - id: other
    description: unrelated step
    tool: fs.exists
    inputs:
      path: a.txt
"#;
        let plan = Plan::parse(yaml).expect("parse");
        let run = runner.run(&plan, &context).await;

        assert_eq!(run.status, PlanRunStatus::Aborted);
        assert_eq!(run.step("write").expect("write record").status, StepStatus::Failed);
        assert_eq!(run.step("other").expect("other record").status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn happy_path_completes_every_step() {
        let mut config = ConfigSnapshot::default();
        config.policy.default_approval = ApprovalDefault::Allow;
        let config = Arc::new(config);
        let engine = build_engine(config.clone());
        let runner = PlanRunner::new(engine);

        let dir = tempfile::tempdir().expect("tempdir");
        let context = context_at(dir.path(), config);

        let yaml = r#"
name: happy
steps:
  - id: write
    description: write a file
    tool: fs.write
    inputs:
      path: a.txt
      content: hi
  - id: check
    description: confirm it exists
    tool: fs.exists
    dependsOn: [write]
    inputs:
      path: a.txt
"#;
        let plan = Plan::parse(yaml).expect("parse");
        let run = runner.run(&plan, &context).await;

        assert_eq!(run.status, PlanRunStatus::Completed);
        assert_eq!(run.step("write").expect("write record").status, StepStatus::Completed);
        assert_eq!(run.step("check").expect("check record").status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn propose_mode_materializes_without_running_any_step() {
        let config = Arc::new(ConfigSnapshot::default());
        let engine = build_engine(config.clone());
        let runner = PlanRunner::new(engine);
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context_at(dir.path(), config);

        let yaml = r#"
mode: propose
name: draft
steps:
  - id: write
    description: write a file
    tool: fs.write
    inputs:
      path: a.txt
      content: hi
"#;
        let plan = Plan::parse(yaml).expect("parse");
        let run = runner.run(&plan, &context).await;

        assert_eq!(run.status, PlanRunStatus::Proposed);
        assert!(run.steps.is_empty());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn pre_approve_mode_resolves_confirm_once_before_any_step() {
        let mut config = ConfigSnapshot::default();
        config.policy.default_approval = ApprovalDefault::Confirm;
        let config = Arc::new(config);
        let engine = build_engine(config.clone());
        let runner = PlanRunner::new(engine);

        let dir = tempfile::tempdir().expect("tempdir");
        let context = context_at(dir.path(), config).with_autonomous(false);

        struct AlwaysApprove;
        #[async_trait::async_trait]
        impl crate::execution::ApprovalPrompter for AlwaysApprove {
            async fn prompt(&self, _action: &crate::execution::ActionDescriptor) -> bool {
                true
            }
        }
        let context = context.with_approval_prompter(Arc::new(AlwaysApprove));

        let yaml = r#"
name: preapproved
policy:
  approvals: pre_approve
steps:
  - id: write
    description: write a file
    tool: fs.write
    inputs:
      path: a.txt
      content: hi
  - id: check
    description: confirm it exists
    tool: fs.exists
    dependsOn: [write]
    inputs:
      path: a.txt
"#;
        let plan = Plan::parse(yaml).expect("parse");
        let run = runner.run(&plan, &context).await;

        assert_eq!(run.status, PlanRunStatus::Completed);
        assert_eq!(run.step("write").expect("write record").status, StepStatus::Completed);
    }
}
