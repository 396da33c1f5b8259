//! Tool Registry: process-wide (per-runtime-instance) map of tool name to
//! definition, with write-once registration and O(1) lookup (spec §4.1).
//!
//! Unlike the teacher's process-wide singleton (flagged in design notes as
//! hidden coupling), this registry is an explicitly constructed value
//! passed into the Execution Engine, Skill Runner, and any MCP-facing
//! entrypoint.

use crate::error::{AgentError, AgentResult};
use crate::execution::ExecutionContext;
use crate::tools::traits::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The outcome of `ToolRegistry::execute`, stamped with elapsed time
/// regardless of success or failure.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<AgentError>,
    pub elapsed_ms: u64,
}

impl ToolResult {
    fn ok(output: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn err(error: AgentError, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    enabled_patterns: Vec<String>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(enabled_patterns: Vec<String>, default_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            enabled_patterns,
            default_timeout,
        }
    }

    /// Write-once registration; duplicate names fail loudly rather than
    /// silently shadowing the first registration.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> AgentResult<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::InvalidInput(vec![format!(
                "tool '{name}' is already registered"
            )]));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// An enable-list pattern is either an exact tool name, or ends in
    /// `.*` and matches by prefix. `fs.*` matches `fs.read`/`fs.write` but
    /// never `fstab` (the `.` is part of the match, not a wildcard).
    fn is_enabled(&self, name: &str) -> bool {
        self.enabled_patterns.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                name.starts_with(prefix) && name[prefix.len()..].starts_with('.')
            } else {
                pattern == name || pattern == "*"
            }
        })
    }

    /// (1) resolve, (2) validate, (3) enable-list check, (4) timeout race,
    /// (5) stamp elapsed time regardless of outcome. Never calls the
    /// Policy Engine — gating is the caller's duty (§4.1), so trusted
    /// orchestration paths can reuse this registry directly.
    pub async fn execute(&self, name: &str, raw_input: Value, context: &ExecutionContext) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.get(name) else {
            return ToolResult::err(AgentError::ToolNotFound(name.to_string()), started.elapsed());
        };

        let mut input = raw_input;
        let schema = tool.input_schema();
        schema.apply_defaults(&mut input);
        let violations = schema.validate(&input);
        if !violations.is_empty() {
            return ToolResult::err(AgentError::InvalidInput(violations), started.elapsed());
        }

        if !self.is_enabled(name) {
            return ToolResult::err(AgentError::ToolDisabled(name.to_string()), started.elapsed());
        }

        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, tool.execute(input, context)).await {
            Ok(Ok(output)) => ToolResult::ok(output, started.elapsed()),
            Ok(Err(err)) => {
                ToolResult::err(AgentError::ToolExecutionFailed(err.to_string()), started.elapsed())
            }
            Err(_) => ToolResult::err(
                AgentError::Timeout(timeout.as_millis() as u64),
                started.elapsed(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use crate::permission::PermissionCategory;
    use crate::tools::schema::SchemaNode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "test.echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> SchemaNode {
            crate::tools::schema::object([("value", SchemaNode::String)])
        }
        fn required_permissions(&self) -> Vec<PermissionCategory> {
            vec![]
        }
        async fn execute(&self, input: Value, _context: &ExecutionContext) -> anyhow::Result<Value> {
            Ok(input)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "test.slow"
        }
        fn description(&self) -> &str {
            "sleeps 200ms"
        }
        fn input_schema(&self) -> SchemaNode {
            SchemaNode::Object(Default::default())
        }
        fn required_permissions(&self) -> Vec<PermissionCategory> {
            vec![]
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(100))
        }
        async fn execute(&self, _input: Value, _context: &ExecutionContext) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({}))
        }
    }

    fn test_context() -> ExecutionContext {
        let (sink, _rx) = crate::audit::channel();
        ExecutionContext::new(
            "run-1",
            PathBuf::from("."),
            Arc::new(ConfigSnapshot::default()),
            sink,
        )
    }

    #[tokio::test]
    async fn enable_list_prefix_matches_dotted_children_only() {
        let mut registry = ToolRegistry::new(vec!["fs.*".to_string()], Duration::from_secs(1));
        registry.register(Arc::new(EchoTool)).expect("register");
        assert!(registry.is_enabled("fs.read"));
        assert!(!registry.is_enabled("fstab"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_tool_not_found() {
        let registry = ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1));
        let context = test_context();
        let result = registry.execute("nope", json!({}), &context).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(AgentError::ToolNotFound("nope".to_string())));
    }

    #[tokio::test]
    async fn invalid_input_is_reported_before_dispatch() {
        let mut registry = ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1));
        registry.register(Arc::new(EchoTool)).expect("register");
        let context = test_context();
        let result = registry.execute("test.echo", json!({}), &context).await;
        assert!(!result.success);
        matches!(result.error, Some(AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn disabled_tool_is_rejected_even_with_valid_input() {
        let mut registry = ToolRegistry::new(vec!["other.*".to_string()], Duration::from_secs(1));
        registry.register(Arc::new(EchoTool)).expect("register");
        let context = test_context();
        let result = registry
            .execute("test.echo", json!({"value": "hi"}), &context)
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(AgentError::ToolDisabled("test.echo".to_string()))
        );
    }

    #[tokio::test]
    async fn a_100ms_timeout_beats_a_200ms_operation() {
        let mut registry = ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(5));
        registry.register(Arc::new(SlowTool)).expect("register");
        let context = test_context();
        let started = Instant::now();
        let result = registry.execute("test.slow", json!({}), &context).await;
        let elapsed = started.elapsed();
        assert!(!result.success);
        assert!(elapsed >= Duration::from_millis(90) && elapsed < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn duplicate_registration_fails_loudly() {
        let mut registry = ToolRegistry::new(vec!["*".to_string()], Duration::from_secs(1));
        registry.register(Arc::new(EchoTool)).expect("first register");
        assert!(registry.register(Arc::new(EchoTool)).is_err());
    }
}
