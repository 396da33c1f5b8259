use crate::execution::ExecutionContext;
use crate::permission::PermissionCategory;
use crate::tools::schema::{self, SchemaNode};
use crate::tools::traits::{Tool, ToolCategory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::process::Command;

/// Runs a shell command in the working tree, truncating captured output to
/// the configured `tools.maxOutputBytes` ceiling (default 10 MiB, §5) so a
/// runaway command cannot balloon the in-memory audit record.
pub struct CommandRunTool;

fn truncate(bytes: Vec<u8>, limit: usize) -> (String, bool) {
    let truncated = bytes.len() > limit;
    let slice = if truncated { &bytes[..limit] } else { &bytes[..] };
    (String::from_utf8_lossy(slice).into_owned(), truncated)
}

#[async_trait]
impl Tool for CommandRunTool {
    fn name(&self) -> &str {
        "cmd.run"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Command
    }

    fn description(&self) -> &str {
        "Runs a shell command in the working tree and captures its output."
    }

    fn input_schema(&self) -> SchemaNode {
        schema::object([("command", SchemaNode::String)])
    }

    fn required_permissions(&self) -> Vec<PermissionCategory> {
        vec![PermissionCategory::Exec]
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value> {
        let command = input["command"].as_str().context("command is required")?;
        let limit = context.config.tools.max_output_bytes;

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&context.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to spawn command")?;

        let (stdout, stdout_truncated) = truncate(output.stdout, limit);
        let (stderr, stderr_truncated) = truncate(output.stderr, limit);

        Ok(json!({
            "exitCode": output.status.code().unwrap_or(-1),
            "stdout": stdout,
            "stderr": stderr,
            "stdoutTruncated": stdout_truncated,
            "stderrTruncated": stderr_truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context_at(root: &std::path::Path) -> ExecutionContext {
        let (sink, _rx) = crate::audit::channel();
        ExecutionContext::new("run-1", root.to_path_buf(), Arc::new(ConfigSnapshot::default()), sink)
    }

    #[tokio::test]
    async fn captures_exit_code_and_stdout() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());
        let result = CommandRunTool
            .execute(json!({"command": "echo hello"}), &context)
            .await
            .expect("execute");
        assert_eq!(result["exitCode"], json!(0));
        assert_eq!(result["stdout"], json!("hello\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());
        let result = CommandRunTool
            .execute(json!({"command": "exit 3"}), &context)
            .await
            .expect("execute");
        assert_eq!(result["exitCode"], json!(3));
    }
}
