pub mod executor;
pub mod types;

pub use executor::{parse_tool_args, ToolError, ToolExecutor};
pub use types::{
    FunctionCall, FunctionSchema, ToolCall, ToolFailure, ToolFailureKind, ToolOutcome,
    ToolResult, ToolSchema,
};
