use agent_core::{tools::ToolSchema, Message};
use async_trait::async_trait;
use reqwest::Client;

use crate::openai_compat::{build_openai_compat_body, parse_openai_compat_completion};
use crate::provider::{LLMError, LLMProvider, Result};

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: Option<u32>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message> {
        let body = build_openai_compat_body(&self.model, messages, tools, self.max_output_tokens);
        log::debug!(
            "Requesting completion from {}: {} message(s), {} tool(s)",
            self.model,
            messages.len(),
            tools.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(LLMError::Api(format!("HTTP {}: {}", status, text)));
        }

        let text = response.text().await?;
        parse_openai_compat_completion(&text)
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model)
    }
}
