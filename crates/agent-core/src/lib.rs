pub mod agent;
pub mod budget;
pub mod tools;

pub use agent::events::AgentEvent;
pub use agent::types::{Message, Role};
pub use agent::AgentError;
pub use budget::{fit, FitReport, FittedContext, HeuristicTokenCounter, TokenBudget, TokenCounter};
pub use tools::{
    parse_tool_args, FunctionCall, FunctionSchema, ToolCall, ToolError, ToolExecutor,
    ToolFailure, ToolFailureKind, ToolOutcome, ToolResult, ToolSchema,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
