//! Skill Runner: a bounded agentic loop seeded with a skill's instructions,
//! calling back into the Tool Registry for each tool call the model makes
//! (spec §4.4). Generalized from the teacher's `execute_skill_with_sub_llm`
//! (skill instructions as system prompt, tool calls threaded back as
//! messages, bounded iteration count) onto the black-box `ModelClient` seam.

use super::manifest::SkillManifest;
use super::model::{ChatMessage, ChatResponse, ModelClient, ToolCall, ToolSpec};
use super::registry::SkillRegistry;
use crate::audit::AuditEventKind;
use crate::error::{AgentError, AgentResult};
use crate::execution::engine::SkillDispatcher;
use crate::execution::{ActionDescriptor, ExecutionContext};
use crate::policy::{Decision, PolicyEngine};
use crate::tools::registry::ToolRegistry;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

pub struct SkillRunner {
    tools: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    skills: Arc<SkillRegistry>,
    model: Arc<dyn ModelClient>,
}

impl SkillRunner {
    pub fn new(
        tools: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        skills: Arc<SkillRegistry>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            tools,
            policy,
            skills,
            model,
        }
    }

    fn build_tool_specs(&self, manifest: &SkillManifest) -> Vec<ToolSpec> {
        manifest
            .allowed_tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema().to_model_schema(),
            })
            .collect()
    }

    /// Gate and dispatch one model-requested tool call, returning the text
    /// fed back to the model as that call's result (success or error, the
    /// loop never aborts on a single failed call).
    async fn handle_tool_call(&self, manifest: &SkillManifest, call: &ToolCall, context: &ExecutionContext) -> String {
        let is_known = self.tools.get(&call.name).is_some();
        let is_allowed = manifest.allowed_tools.iter().any(|t| t == &call.name);

        if !is_allowed {
            let err = if is_known {
                AgentError::ToolNotAllowed(call.name.clone())
            } else {
                AgentError::ToolNotFound(call.name.clone())
            };
            return json!({"error": err.to_string()}).to_string();
        }

        let Some(tool) = self.tools.get(&call.name) else {
            return json!({"error": AgentError::ToolNotFound(call.name.clone()).to_string()}).to_string();
        };

        let action = ActionDescriptor {
            tool_name: call.name.clone(),
            operation: format!("skill-call:{}", call.name),
            description: format!("skill invocation of {}", call.name),
            required_permissions: tool.required_permissions(),
            arguments: call.arguments.clone(),
            risk_level: crate::permission::RiskLevel::Medium,
        };

        let gated = match self.policy.check(&action, context).await {
            Decision::Allowed => true,
            Decision::Denied(_) => false,
            Decision::NeedsApproval(_) => self.policy.request_approval(&action, context).await,
        };

        if !gated {
            return json!({"error": "permission denied"}).to_string();
        }

        let result = self.tools.execute(&call.name, call.arguments.clone(), context).await;
        if result.success {
            result.output.unwrap_or(Value::Null).to_string()
        } else {
            json!({"error": result.error.map(|e| e.to_string()).unwrap_or_default()}).to_string()
        }
    }

    /// Runs a skill's declared post-run validators in order (spec §4.4 step
    /// 5) after the loop has terminated naturally. Success requires every
    /// validator to exit zero; an empty list is vacuously successful.
    async fn run_validators(&self, manifest: &SkillManifest, context: &ExecutionContext) -> (bool, Vec<Value>) {
        let mut results = Vec::with_capacity(manifest.validators.len());
        let mut all_passed = true;
        for command in &manifest.validators {
            let outcome = self
                .tools
                .execute("cmd.run", json!({"command": command}), context)
                .await;
            let exit_code = outcome
                .output
                .as_ref()
                .and_then(|v| v.get("exitCode"))
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            let passed = outcome.success && exit_code == 0;
            all_passed &= passed;
            results.push(json!({
                "command": command,
                "passed": passed,
                "exitCode": exit_code,
            }));
        }
        (all_passed, results)
    }
}

/// `{{key}}` substitution against the flat string/number/bool fields of a
/// JSON object. Missing keys are left untouched rather than erroring, since
/// a skill's instructions may reference optional placeholders.
fn render_template(template: &str, inputs: &Value) -> String {
    let Some(obj) = inputs.as_object() else {
        return template.to_string();
    };
    let mut rendered = template.to_string();
    for (key, value) in obj {
        let placeholder = format!("{{{{{key}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

#[async_trait]
impl SkillDispatcher for SkillRunner {
    async fn run_skill(&self, name: &str, inputs: Value, context: &ExecutionContext) -> AgentResult<Value> {
        let started = Instant::now();
        let loaded = self
            .skills
            .get(name)
            .ok_or_else(|| AgentError::SkillNotFound(name.to_string()))?;
        let manifest = loaded.manifest.clone();

        context.audit.emit(AuditEventKind::SkillLoaded, json!({"skill": name}));

        let system_prompt = render_template(&manifest.instructions, &inputs);
        let user_text = inputs
            .get("goal")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| inputs.to_string());

        let mut messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_text)];
        let tool_specs = self.build_tool_specs(&manifest);
        let mut tool_call_log = Vec::new();

        for _ in 0..manifest.max_iterations {
            let response: ChatResponse = self
                .model
                .chat(&messages, &tool_specs)
                .await
                .map_err(|err| AgentError::RunAborted(format!("model call failed: {err}")))?;

            if response.tool_calls.is_empty() {
                let (validators_passed, validator_results) = self.run_validators(&manifest, context).await;
                return Ok(json!({
                    "success": validators_passed,
                    "text": response.text,
                    "toolCalls": tool_call_log,
                    "validators": validator_results,
                    "durationMs": started.elapsed().as_millis() as u64,
                }));
            }

            messages.push(ChatMessage::assistant(response.text.clone().unwrap_or_default()));

            for call in &response.tool_calls {
                let result_text = self.handle_tool_call(&manifest, call, context).await;
                tool_call_log.push(json!({
                    "tool": call.name,
                    "input": call.arguments,
                    "result": result_text,
                }));
                messages.push(ChatMessage::tool_result(call.id.clone(), result_text));
            }
        }

        Err(AgentError::RunAborted(format!(
            "skill '{name}' exceeded {} iterations without terminating",
            manifest.max_iterations
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedModel {
        responses: Mutex<Vec<ChatResponse>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn chat(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> anyhow::Result<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.remove(0))
        }
    }

    fn test_context() -> ExecutionContext {
        let (sink, _rx) = crate::audit::channel();
        ExecutionContext::new(
            "run-1",
            std::env::temp_dir(),
            Arc::new(ConfigSnapshot::default()),
            sink,
        )
    }

    #[tokio::test]
    async fn text_only_response_terminates_immediately() {
        let model = Arc::new(ScriptedModel {
            responses: Mutex::new(vec![ChatResponse {
                text: Some("done".to_string()),
                tool_calls: vec![],
            }]),
        });
        let tools = Arc::new(ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1)));
        let config = Arc::new(ConfigSnapshot::default());
        let policy = Arc::new(PolicyEngine::new(config));

        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(
            dir.path().join("s.json"),
            r#"{"name": "s", "description": "d", "instructions": "hello {{who}}"}"#,
        )
        .await
        .expect("write");
        let mut skill_registry = SkillRegistry::new();
        skill_registry.load_dir(dir.path()).await;

        let runner = SkillRunner::new(tools, policy, Arc::new(skill_registry), model);
        let context = test_context();
        let result = runner
            .run_skill("s", json!({"who": "world"}), &context)
            .await
            .expect("run_skill");
        assert_eq!(result["text"], json!("done"));
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["toolCalls"], json!([]));
        assert_eq!(result["validators"], json!([]));
    }

    #[tokio::test]
    async fn failing_validator_marks_the_result_unsuccessful() {
        use crate::tools::builtin::CommandRunTool;

        let model = Arc::new(ScriptedModel {
            responses: Mutex::new(vec![ChatResponse {
                text: Some("done".to_string()),
                tool_calls: vec![],
            }]),
        });
        let mut tool_registry = ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1));
        tool_registry.register(Arc::new(CommandRunTool)).expect("register cmd.run");
        let tools = Arc::new(tool_registry);
        let config = Arc::new(ConfigSnapshot::default());
        let policy = Arc::new(PolicyEngine::new(config));

        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(
            dir.path().join("s.json"),
            r#"{"name": "s", "description": "d", "instructions": "hello", "validators": ["exit 1"]}"#,
        )
        .await
        .expect("write");
        let mut skill_registry = SkillRegistry::new();
        skill_registry.load_dir(dir.path()).await;

        let runner = SkillRunner::new(tools, policy, Arc::new(skill_registry), model);
        let context = test_context();
        let result = runner
            .run_skill("s", json!({}), &context)
            .await
            .expect("run_skill");
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["validators"][0]["passed"], json!(false));
    }

    #[tokio::test]
    async fn unknown_skill_is_reported() {
        let tools = Arc::new(ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1)));
        let config = Arc::new(ConfigSnapshot::default());
        let policy = Arc::new(PolicyEngine::new(config));
        let model = Arc::new(ScriptedModel {
            responses: Mutex::new(vec![]),
        });
        let runner = SkillRunner::new(tools, policy, Arc::new(SkillRegistry::new()), model);
        let context = test_context();
        let result = runner.run_skill("ghost", json!({}), &context).await;
        assert!(matches!(result, Err(AgentError::SkillNotFound(_))));
    }

    #[test]
    fn template_substitution_replaces_known_keys_only() {
        let rendered = render_template("hi {{name}}, {{missing}}", &json!({"name": "ada"}));
        assert_eq!(rendered, "hi ada, {{missing}}");
    }
}
