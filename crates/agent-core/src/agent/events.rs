use crate::budget::FitReport;
use crate::tools::ToolResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStarted {
        turn: usize,
        max_turns: usize,
    },

    /// Emitted after the transcript is fitted to the budget for a turn.
    BudgetFitted {
        report: FitReport,
    },

    ToolStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    ToolComplete {
        tool_call_id: String,
        result: ToolResult,
    },

    ToolError {
        tool_call_id: String,
        error: String,
    },

    Complete {
        turns: usize,
    },

    Aborted {
        turns: usize,
        reason: String,
    },
}
