use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::budget::{fit, verify_fit_invariants, ModelLimitsRegistry};
use agent_core::tools::{ToolCall, ToolError, ToolExecutor, ToolFailureKind, ToolResult, ToolSchema};
use agent_core::{AgentError, AgentEvent, Message};
use agent_llm::LLMProvider;

use crate::config::AgentLoopConfig;
use crate::types::{AbortReason, ChatRequest, ChatResponse, ChatStatus};

pub type Result<T> = std::result::Result<T, AgentError>;

/// Where the loop stands between two steps.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    /// Ask the model for the next action.
    Planning,
    /// Run the tool calls the model just requested.
    Dispatching(Vec<ToolCall>),
    Done(Message),
    Aborted(AbortReason),
}

/// Everything a run needs besides the request itself.
pub struct TurnLoop {
    llm: Arc<dyn LLMProvider>,
    tools: Arc<dyn ToolExecutor>,
    config: AgentLoopConfig,
    limits: ModelLimitsRegistry,
    event_tx: Option<mpsc::Sender<AgentEvent>>,
}

struct RunState {
    session_id: String,
    use_tools: bool,
    max_turns: usize,
    turns: usize,
    conversation: Vec<Message>,
    tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolResult>,
    issued_ids: HashSet<String>,
    partial: Option<Message>,
}

impl TurnLoop {
    pub fn new(llm: Arc<dyn LLMProvider>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            llm,
            tools,
            config: AgentLoopConfig::default(),
            limits: ModelLimitsRegistry::new(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: AgentLoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_model_limits(mut self, limits: ModelLimitsRegistry) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Drive one request to `Done` or `Aborted`.
    ///
    /// Returns an error only for an invalid request or cancellation; model
    /// failures and the turn limit end the run with an aborted response.
    pub async fn run(&self, request: ChatRequest, cancel_token: CancellationToken) -> Result<ChatResponse> {
        request.validate()?;

        let mut run = RunState {
            session_id: request.session_id,
            use_tools: request.use_tools,
            max_turns: request.max_turns,
            turns: 0,
            conversation: request.messages,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            issued_ids: HashSet::new(),
            partial: None,
        };
        for message in &run.conversation {
            for call in message.tool_calls.iter().flatten() {
                run.issued_ids.insert(call.id.clone());
            }
        }

        log::debug!(
            "[{}] Starting turn loop: {} message(s), max {} turn(s), tools {}",
            run.session_id,
            run.conversation.len(),
            run.max_turns,
            if run.use_tools { "on" } else { "off" }
        );

        let mut state = LoopState::Planning;
        loop {
            if cancel_token.is_cancelled() {
                log::info!("[{}] Turn loop cancelled after {} turn(s)", run.session_id, run.turns);
                return Err(AgentError::Cancelled);
            }

            state = match state {
                LoopState::Planning => self.plan(&mut run, &cancel_token).await?,
                LoopState::Dispatching(calls) => {
                    self.dispatch(&mut run, calls, &cancel_token).await?;
                    LoopState::Planning
                }
                LoopState::Done(message) => {
                    run.conversation.push(message.clone());
                    self.emit(AgentEvent::Complete { turns: run.turns }).await;
                    log::info!("[{}] Turn loop completed in {} turn(s)", run.session_id, run.turns);
                    return Ok(ChatResponse {
                        message: Some(message),
                        tool_calls: run.tool_calls,
                        tool_results: run.tool_results,
                        status: ChatStatus::Completed,
                        abort_reason: None,
                        turns: run.turns,
                    });
                }
                LoopState::Aborted(reason) => {
                    log::warn!(
                        "[{}] Turn loop aborted after {} turn(s): {}",
                        run.session_id,
                        run.turns,
                        reason
                    );
                    self.emit(AgentEvent::Aborted {
                        turns: run.turns,
                        reason: reason.to_string(),
                    })
                    .await;
                    return Ok(ChatResponse {
                        message: run.partial,
                        tool_calls: run.tool_calls,
                        tool_results: run.tool_results,
                        status: ChatStatus::Aborted,
                        abort_reason: Some(reason),
                        turns: run.turns,
                    });
                }
            };
        }
    }

    async fn plan(&self, run: &mut RunState, cancel_token: &CancellationToken) -> Result<LoopState> {
        if run.turns >= run.max_turns {
            return Ok(LoopState::Aborted(AbortReason::TurnLimit));
        }
        run.turns += 1;
        self.emit(AgentEvent::TurnStarted {
            turn: run.turns,
            max_turns: run.max_turns,
        })
        .await;

        let budget = self.config.resolve_budget(&self.limits);
        let before = std::mem::take(&mut run.conversation);
        let fitted = fit(before.clone(), &budget, self.config.token_counter.as_ref());
        debug_assert!(verify_fit_invariants(&before, &fitted));
        if fitted.report.clipped > 0 || fitted.report.removed > 0 {
            log::debug!(
                "[{}] Budget fit: clipped {}, removed {}, {} of {} tokens",
                run.session_id,
                fitted.report.clipped,
                fitted.report.removed,
                fitted.report.total_tokens,
                fitted.report.budget_limit
            );
        }
        run.conversation = fitted.messages;
        self.emit(AgentEvent::BudgetFitted {
            report: fitted.report,
        })
        .await;

        let catalog: Vec<ToolSchema> = if run.use_tools {
            tokio::select! {
                _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
                tools = self.tools.list_tools(&run.session_id) => tools,
            }
        } else {
            Vec::new()
        };

        let reply = tokio::select! {
            _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
            reply = tokio::time::timeout(
                self.config.model_timeout,
                self.llm.complete(&run.conversation, &catalog),
            ) => reply,
        };

        let message = match reply {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Ok(LoopState::Aborted(AbortReason::ModelError(e.to_string()))),
            Err(_) => {
                return Ok(LoopState::Aborted(AbortReason::ModelError(format!(
                    "no completion within {}ms",
                    self.config.model_timeout.as_millis()
                ))))
            }
        };

        if !message.has_tool_calls() {
            return Ok(LoopState::Done(message));
        }

        let mut message = message;
        let calls = normalize_call_ids(
            message.tool_calls.take().unwrap_or_default(),
            &mut run.issued_ids,
        );
        message.tool_calls = Some(calls.clone());
        if !message.text().is_empty() {
            run.partial = Some(Message::assistant(message.text(), None));
        }
        log::debug!(
            "[{}] Turn {} requested {} tool call(s)",
            run.session_id,
            run.turns,
            calls.len()
        );
        run.conversation.push(message);
        Ok(LoopState::Dispatching(calls))
    }

    /// Run every call and append one result per call, in request order.
    async fn dispatch(
        &self,
        run: &mut RunState,
        calls: Vec<ToolCall>,
        cancel_token: &CancellationToken,
    ) -> Result<()> {
        let results = if run.use_tools {
            tokio::select! {
                _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
                results = self.execute_lanes(&run.session_id, &calls) => results,
            }
        } else {
            calls
                .iter()
                .map(|call| {
                    ToolResult::failure(call, ToolFailureKind::Disabled, "tools are disabled for this request")
                })
                .collect()
        };

        for (call, result) in calls.into_iter().zip(results) {
            run.conversation.push(Message::from_tool_result(&result));
            run.tool_calls.push(call);
            run.tool_results.push(result);
        }
        Ok(())
    }

    /// Calls in one lane run serially in request order; lanes run concurrently.
    async fn execute_lanes(&self, session_id: &str, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut lanes: Vec<(String, Vec<usize>)> = Vec::new();
        for (index, call) in calls.iter().enumerate() {
            let lane = self.tools.lane(call);
            match lanes.iter_mut().find(|(name, _)| *name == lane) {
                Some((_, indices)) => indices.push(index),
                None => lanes.push((lane, vec![index])),
            }
        }

        let lane_runs = lanes.iter().map(|(_, indices)| async move {
            let mut results = Vec::with_capacity(indices.len());
            for &index in indices {
                results.push((index, self.execute_one(session_id, &calls[index]).await));
            }
            results
        });

        let mut ordered: Vec<Option<ToolResult>> = vec![None; calls.len()];
        for (index, result) in join_all(lane_runs).await.into_iter().flatten() {
            ordered[index] = Some(result);
        }
        ordered
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| {
                    ToolResult::failure(call, ToolFailureKind::Execution, "tool call was not executed")
                })
            })
            .collect()
    }

    async fn execute_one(&self, session_id: &str, call: &ToolCall) -> ToolResult {
        self.emit(AgentEvent::ToolStart {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        })
        .await;

        let outcome = match tokio::time::timeout(
            self.config.tool_timeout,
            self.tools.execute(session_id, call),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout(format!(
                "{} did not finish within {}ms",
                call.function.name,
                self.config.tool_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(payload) => {
                let result = ToolResult::success(call, payload);
                self.emit(AgentEvent::ToolComplete {
                    tool_call_id: call.id.clone(),
                    result: result.clone(),
                })
                .await;
                result
            }
            Err(error) => {
                log::warn!(
                    "[{}] Tool {} ({}) failed: {}",
                    session_id,
                    call.function.name,
                    call.id,
                    error
                );
                self.emit(AgentEvent::ToolError {
                    tool_call_id: call.id.clone(),
                    error: error.to_string(),
                })
                .await;
                ToolResult::from_error(call, &error)
            }
        }
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Replace empty or already issued call ids so every result correlates to one call.
fn normalize_call_ids(calls: Vec<ToolCall>, issued: &mut HashSet<String>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() || issued.contains(&call.id) {
                let replacement = format!("call_{}", uuid::Uuid::new_v4().simple());
                log::debug!(
                    "Replacing tool call id {:?} with {}",
                    call.id,
                    replacement
                );
                call.id = replacement;
            }
            issued.insert(call.id.clone());
            call
        })
        .collect()
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
