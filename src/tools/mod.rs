//! Built-in tools, the schema AST they validate against, and the registry
//! that holds them (spec §4.1).

pub mod builtin;
pub mod registry;
pub mod schema;
pub mod traits;

pub use registry::{ToolRegistry, ToolResult};
pub use traits::{Tool, ToolCategory, ToolDefinition};
