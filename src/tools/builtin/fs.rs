use crate::execution::ExecutionContext;
use crate::permission::PermissionCategory;
use crate::tools::schema::{self, SchemaNode};
use crate::tools::traits::{Tool, ToolCategory};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use path_clean::PathClean;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Resolve `path` against the working tree root and reject anything that
/// cleans to outside it, mirroring the teacher's canonicalize-then-contains
/// check in `FileOpsTool`. This is a baseline safety net independent of the
/// Policy Engine's own filesystem allow-list.
fn resolve_within_root(root: &Path, path: &str) -> Result<PathBuf> {
    let joined = root.join(path).clean();
    let root_clean = root.to_path_buf().clean();
    if !joined.starts_with(&root_clean) {
        return Err(anyhow!("path '{path}' escapes the working tree root"));
    }
    Ok(joined)
}

pub struct FsReadTool;

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Filesystem
    }

    fn description(&self) -> &str {
        "Reads the contents of a file in the working tree."
    }

    fn input_schema(&self) -> SchemaNode {
        schema::object([("path", SchemaNode::String)])
    }

    fn required_permissions(&self) -> Vec<PermissionCategory> {
        vec![PermissionCategory::FilesystemRead]
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value> {
        let path = input["path"].as_str().context("path is required")?;
        let resolved = resolve_within_root(&context.working_dir, path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        Ok(json!({"path": path, "content": content}))
    }
}

pub struct FsWriteTool;

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs.write"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Filesystem
    }

    fn description(&self) -> &str {
        "Writes (creating or overwriting) a file in the working tree."
    }

    fn input_schema(&self) -> SchemaNode {
        schema::object([
            ("path", SchemaNode::String),
            ("content", SchemaNode::String),
        ])
    }

    fn required_permissions(&self) -> Vec<PermissionCategory> {
        vec![PermissionCategory::FilesystemWrite]
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value> {
        let path = input["path"].as_str().context("path is required")?;
        let content = input["content"].as_str().context("content is required")?;
        let resolved = resolve_within_root(&context.working_dir, path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&resolved, content)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        Ok(json!({"path": path, "bytesWritten": content.len()}))
    }
}

pub struct FsPatchTool;

#[async_trait]
impl Tool for FsPatchTool {
    fn name(&self) -> &str {
        "fs.patch"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Filesystem
    }

    fn description(&self) -> &str {
        "Replaces the first occurrence of `find` with `replace` in a file."
    }

    fn input_schema(&self) -> SchemaNode {
        schema::object([
            ("path", SchemaNode::String),
            ("find", SchemaNode::String),
            ("replace", SchemaNode::String),
        ])
    }

    fn required_permissions(&self) -> Vec<PermissionCategory> {
        vec![PermissionCategory::FilesystemWrite]
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value> {
        let path = input["path"].as_str().context("path is required")?;
        let find = input["find"].as_str().context("find is required")?;
        let replace = input["replace"].as_str().context("replace is required")?;
        let resolved = resolve_within_root(&context.working_dir, path)?;

        let original = tokio::fs::read_to_string(&resolved)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        let Some(offset) = original.find(find) else {
            return Err(anyhow!("pattern not found in {path}"));
        };
        let patched = format!(
            "{}{}{}",
            &original[..offset],
            replace,
            &original[offset + find.len()..]
        );
        tokio::fs::write(&resolved, &patched)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        Ok(json!({"path": path, "replacements": 1}))
    }
}

pub struct FsExistsTool;

#[async_trait]
impl Tool for FsExistsTool {
    fn name(&self) -> &str {
        "fs.exists"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Filesystem
    }

    fn description(&self) -> &str {
        "Checks whether a path exists in the working tree."
    }

    fn input_schema(&self) -> SchemaNode {
        schema::object([("path", SchemaNode::String)])
    }

    fn required_permissions(&self) -> Vec<PermissionCategory> {
        vec![PermissionCategory::FilesystemRead]
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value> {
        let path = input["path"].as_str().context("path is required")?;
        let resolved = resolve_within_root(&context.working_dir, path)?;
        let exists = tokio::fs::metadata(&resolved).await.is_ok();
        Ok(json!({"path": path, "exists": exists}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context_at(root: &Path) -> ExecutionContext {
        let (sink, _rx) = crate::audit::channel();
        ExecutionContext::new("run-1", root.to_path_buf(), Arc::new(ConfigSnapshot::default()), sink)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());

        FsWriteTool
            .execute(json!({"path": "a.txt", "content": "hi"}), &context)
            .await
            .expect("write");
        let read = FsReadTool
            .execute(json!({"path": "a.txt"}), &context)
            .await
            .expect("read");
        assert_eq!(read["content"], json!("hi"));
    }

    #[tokio::test]
    async fn traversal_outside_root_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());
        let result = FsReadTool
            .execute(json!({"path": "../outside.txt"}), &context)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn patch_replaces_first_occurrence_only() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());
        FsWriteTool
            .execute(json!({"path": "f.txt", "content": "foo foo"}), &context)
            .await
            .expect("write");
        FsPatchTool
            .execute(
                json!({"path": "f.txt", "find": "foo", "replace": "bar"}),
                &context,
            )
            .await
            .expect("patch");
        let read = FsReadTool
            .execute(json!({"path": "f.txt"}), &context)
            .await
            .expect("read");
        assert_eq!(read["content"], json!("bar foo"));
    }

    #[tokio::test]
    async fn exists_reports_false_for_missing_path() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(dir.path());
        let result = FsExistsTool
            .execute(json!({"path": "missing.txt"}), &context)
            .await
            .expect("exists");
        assert_eq!(result["exists"], json!(false));
    }
}
