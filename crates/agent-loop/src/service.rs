use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::budget::ModelLimitsRegistry;
use agent_core::tools::ToolExecutor;
use agent_core::{AgentError, AgentEvent};
use agent_llm::LLMProvider;
use agent_mcp::{ConnectionRegistry, McpToolExecutor};

use crate::config::AgentLoopConfig;
use crate::runner::{Result, TurnLoop};
use crate::types::{ChatRequest, ChatResponse, ErrorEnvelope};

/// Entry point for chat requests: connects the requested providers for the
/// session, then runs the turn loop against the session's tools.
pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    turn_loop: TurnLoop,
}

impl Orchestrator {
    pub fn new(registry: Arc<ConnectionRegistry>, llm: Arc<dyn LLMProvider>) -> Self {
        let config = AgentLoopConfig {
            model_name: llm.model_name().map(str::to_string),
            ..Default::default()
        };
        let tools: Arc<dyn ToolExecutor> = Arc::new(McpToolExecutor::new(registry.clone()));
        Self {
            registry,
            turn_loop: TurnLoop::new(llm, tools).with_config(config),
        }
    }

    pub fn with_config(mut self, config: AgentLoopConfig) -> Self {
        self.turn_loop = self.turn_loop.with_config(config);
        self
    }

    pub fn with_model_limits(mut self, limits: ModelLimitsRegistry) -> Self {
        self.turn_loop = self.turn_loop.with_model_limits(limits);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.turn_loop = self.turn_loop.with_event_channel(tx);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn chat_with_cancel(
        &self,
        request: ChatRequest,
        cancel_token: CancellationToken,
    ) -> Result<ChatResponse> {
        request.validate()?;

        tokio::select! {
            _ = cancel_token.cancelled() => return Err(AgentError::Cancelled),
            connected = self.connect_providers(&request) => connected?,
        }

        self.turn_loop.run(request, cancel_token).await
    }

    /// Like [`chat`](Self::chat), with failures rendered as an error envelope.
    pub async fn handle(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ErrorEnvelope> {
        self.chat(request).await.map_err(ErrorEnvelope::from)
    }

    /// Close every provider connection of the session.
    pub async fn end_session(&self, session_id: &str) -> usize {
        let closed = self.registry.disconnect_all(session_id).await;
        log::info!("[{}] Session ended, {} connection(s) closed", session_id, closed);
        closed
    }

    async fn connect_providers(&self, request: &ChatRequest) -> Result<()> {
        if request.providers.is_empty() {
            return Ok(());
        }

        let attempts = request
            .providers
            .iter()
            .map(|provider| self.registry.connect(&request.session_id, provider));
        for (provider, outcome) in request.providers.iter().zip(join_all(attempts).await) {
            if let Err(e) = outcome {
                log::error!(
                    "[{}] Failed to connect provider {}: {}",
                    request.session_id,
                    provider,
                    e
                );
                return Err(AgentError::Connection(e.to_string()));
            }
        }
        Ok(())
    }
}
