//! Declarative Plan files: a name, a dependency-ordered list of Steps, a
//! failure policy, and optional Scheduler triggers (spec §3, §4.6).
//! Parsed from YAML via `serde-saphyr`, the same "declarative manifest as
//! plain serde struct" pattern the teacher uses for its own config layer.

pub mod run;
pub mod runner;

pub use run::{PlanRun, PlanRunStatus, StepRunRecord, StepStatus};
pub use runner::PlanRunner;

use crate::execution::VerifyClause;
use crate::permission::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Retry,
    Skip,
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Auto,
    PerStep,
    PreApprove,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::PerStep
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPolicy {
    #[serde(default)]
    pub approvals: ApprovalMode,
    /// Filesystem/command allow-lists scoped to this plan, layered
    /// additively on top of the configured policy's own (spec §3).
    #[serde(default)]
    pub filesystem_allowlist: Vec<String>,
    #[serde(default)]
    pub command_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Execute,
    Propose,
}

impl Default for PlanMode {
    fn default() -> Self {
        PlanMode::Execute
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default = "default_risk_level")]
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Trigger {
    Cron {
        expression: String,
        #[serde(default)]
        timezone: Option<String>,
    },
    FsChange {
        paths: Vec<String>,
        #[serde(default)]
        debounce_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub description: String,
    /// Exactly one of `tool`/`skill` names the dispatch target; enforced
    /// by `Plan::validate`, not by the (de)serialization shape, since YAML
    /// has no native tagged-union-by-presence idiom.
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-step failure policy (spec §3/§6): `retry`, `skip`, or `abort`
    /// (default). Plan-level policy carries only approvals and scoped
    /// allow-lists — failure handling is a per-step decision.
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Retry count consulted only when `on_failure == retry`; default 0
    /// means a failed step is never retried even under that policy.
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub verify: Option<VerifyClause>,
    #[serde(default)]
    pub rollback_paths: Vec<PathBuf>,
    #[serde(default = "default_risk_level")]
    pub risk_level: RiskLevel,
}

fn default_risk_level() -> RiskLevel {
    RiskLevel::Medium
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: PlanMode,
    #[serde(default)]
    pub goals: Vec<Goal>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub policy: PlanPolicy,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Plan {
    pub fn parse(yaml: &str) -> Result<Self, String> {
        let plan: Plan = serde_saphyr::from_str(yaml).map_err(|err| err.to_string())?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("plan name must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err("plan must declare at least one step".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
            match (&step.tool, &step.skill) {
                (Some(_), Some(_)) => {
                    return Err(format!("step '{}' names both a tool and a skill", step.id));
                }
                (None, None) => {
                    return Err(format!("step '{}' names neither a tool nor a skill", step.id));
                }
                _ => {}
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: refactor-module
description: Refactor a module and verify it builds
steps:
  - id: read
    description: read the target file
    tool: fs.read
    inputs:
      path: src/lib.rs
  - id: write
    description: apply the refactor
    tool: fs.write
    dependsOn: [read]
    onFailure: abort
    inputs:
      path: src/lib.rs
      content: "pub fn x() {}"
"#;

    #[test]
    fn parses_a_well_formed_plan() {
        let plan = Plan::parse(SAMPLE).expect("parse");
        assert_eq!(plan.name, "refactor-module");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec!["read".to_string()]);
        assert_eq!(plan.steps[1].on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn rejects_step_with_unknown_dependency() {
        let yaml = r#"
name: bad
steps:
  - id: only
    description: d
    tool: fs.read
    dependsOn: [missing]
    inputs: {}
"#;
        assert!(Plan::parse(yaml).is_err());
    }

    #[test]
    fn rejects_step_naming_neither_tool_nor_skill() {
        let yaml = r#"
name: bad
steps:
  - id: only
    description: d
    inputs: {}
"#;
        assert!(Plan::parse(yaml).is_err());
    }

    #[test]
    fn data_model_round_trips_through_json() {
        let plan = Plan::parse(SAMPLE).expect("parse");
        let value = serde_json::to_value(&plan).expect("to_value");
        let back: Plan = serde_json::from_value(value).expect("from_value");
        assert_eq!(back.name, plan.name);
        assert_eq!(back.steps.len(), plan.steps.len());
    }
}
