//! Built-in tool implementations, generalized from the teacher's
//! `tools::file_ops`/`tools::command` pair into one `Tool` each: a working
//! tree lives in `ExecutionContext::working_dir`, not a field on the tool,
//! so a single registry instance serves every run's tree.

mod command;
mod fs;

pub use command::CommandRunTool;
pub use fs::{FsExistsTool, FsPatchTool, FsReadTool, FsWriteTool};
