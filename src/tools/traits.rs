//! The `Tool` trait and its immutable `ToolDefinition` wrapper.
//!
//! Mirrors the teacher's `tools::traits::Tool` shape (an async `execute`
//! taking a validated `serde_json::Value` and returning one) generalized to
//! carry the typed input/output schema and declared permissions the policy
//! engine and registry both need.

use crate::execution::ExecutionContext;
use crate::permission::PermissionCategory;
use crate::tools::schema::SchemaNode;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// A tool's category, used only for display/grouping; dispatch keys off the
/// dotted `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Filesystem,
    Command,
    Network,
    Other,
}

/// The pure async operation a tool performs once validated and gated.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable dotted name, e.g. `fs.read`.
    fn name(&self) -> &str;

    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }

    fn description(&self) -> &str;

    fn input_schema(&self) -> SchemaNode;

    fn output_schema(&self) -> SchemaNode {
        SchemaNode::Object(Default::default())
    }

    fn required_permissions(&self) -> Vec<PermissionCategory>;

    /// Per-call timeout override; `None` defers to the registry's configured
    /// default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, input: Value, context: &ExecutionContext) -> Result<Value>;
}

/// Immutable registration record. The registry stores `Arc<dyn Tool>`
/// wrapped in this struct only when it needs the extra bookkeeping fields;
/// in practice the registry asks the `Tool` object itself for everything,
/// so this type exists mainly to make "immutable once registered" explicit
/// at the type level.
pub struct ToolDefinition {
    pub name: String,
    pub category: ToolCategory,
    pub description: String,
    pub input_schema: SchemaNode,
    pub output_schema: SchemaNode,
    pub required_permissions: Vec<PermissionCategory>,
    pub timeout: Option<Duration>,
}

impl ToolDefinition {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            category: tool.category(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            output_schema: tool.output_schema(),
            required_permissions: tool.required_permissions(),
            timeout: tool.timeout(),
        }
    }
}
