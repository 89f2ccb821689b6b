use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use orchestrator_core::{ChatModel, OrchestratorError, OrchestratorResult, RoleKey, TokenUsage};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::provider::ProviderKind;
use crate::usage::UsageAggregator;

/// An HTTP-backed `ChatModel`, one instance per `(provider, model)` pair, sharing a
/// single connection-pooled `reqwest::Client` across the gateway (§4.1). Grounded on
/// the teacher's `HttpMLProvider`, which delegates every capability to a shared
/// `MLClient`; here the capability is "complete a chat turn" instead of an ML
/// inference call, and the wire shape is picked per `ProviderKind`.
pub struct HttpChatModel {
    http: reqwest::Client,
    role: RoleKey,
    provider_id: String,
    model: String,
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    usage: Arc<UsageAggregator>,
}

impl HttpChatModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        role: RoleKey,
        provider_id: String,
        model: String,
        kind: ProviderKind,
        base_url: String,
        api_key: String,
        usage: Arc<UsageAggregator>,
    ) -> Self {
        Self { http, role, provider_id, model, kind, base_url, api_key, usage }
    }

    async fn complete_inner(&self, system: &str, messages: &[String]) -> Result<(String, u32, u32), GatewayError> {
        match self.kind {
            ProviderKind::OpenAiCompatible | ProviderKind::Google => self.complete_openai_style(system, messages).await,
            ProviderKind::Anthropic => self.complete_anthropic(system, messages).await,
        }
    }

    async fn complete_openai_style(&self, system: &str, messages: &[String]) -> Result<(String, u32, u32), GatewayError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<OpenAiMessage<'a>>,
        }
        #[derive(Serialize)]
        struct OpenAiMessage<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }
        #[derive(Deserialize)]
        struct ResponseMessage {
            content: String,
        }
        #[derive(Deserialize, Default)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: u32,
            #[serde(default)]
            completion_tokens: u32,
        }

        let mut payload_messages = vec![OpenAiMessage { role: "system", content: system }];
        payload_messages.extend(messages.iter().map(|m| OpenAiMessage { role: "user", content: m }));

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest { model: &self.model, messages: payload_messages })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        let usage = parsed.usage.unwrap_or_default();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::InvalidResponse("no choices in chat completion".to_string()))?;
        Ok((text, usage.prompt_tokens, usage.completion_tokens))
    }

    async fn complete_anthropic(&self, system: &str, messages: &[String]) -> Result<(String, u32, u32), GatewayError> {
        #[derive(Serialize)]
        struct MessagesRequest<'a> {
            model: &'a str,
            system: &'a str,
            max_tokens: u32,
            messages: Vec<AnthropicMessage<'a>>,
        }
        #[derive(Serialize)]
        struct AnthropicMessage<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Deserialize)]
        struct MessagesResponse {
            content: Vec<ContentBlock>,
            #[serde(default)]
            usage: Option<AnthropicUsage>,
        }
        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: String,
        }
        #[derive(Deserialize, Default)]
        struct AnthropicUsage {
            #[serde(default)]
            input_tokens: u32,
            #[serde(default)]
            output_tokens: u32,
        }

        let payload_messages: Vec<AnthropicMessage> =
            messages.iter().map(|m| AnthropicMessage { role: "user", content: m }).collect();

        let response = self
            .http
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&MessagesRequest { model: &self.model, system, max_tokens: 4096, messages: payload_messages })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, body));
        }

        let parsed: MessagesResponse = response.json().await?;
        let usage = parsed.usage.unwrap_or_default();
        let text = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| GatewayError::InvalidResponse("no content blocks in response".to_string()))?;
        Ok((text, usage.input_tokens, usage.output_tokens))
    }
}

fn classify_http_failure(status: reqwest::StatusCode, body: String) -> GatewayError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GatewayError::ProviderUnavailable(format!("{status}: {body}"))
    } else {
        GatewayError::InvalidResponse(format!("{status}: {body}"))
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, system: &str, messages: &[String]) -> OrchestratorResult<(String, TokenUsage)> {
        let started = Instant::now();
        let result = self.complete_inner(system, messages).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((text, prompt_tokens, completion_tokens)) => {
                let usage = TokenUsage {
                    role: self.role,
                    provider: self.provider_id.clone(),
                    model: self.model.clone(),
                    prompt_tokens,
                    completion_tokens,
                    latency_ms,
                    success: true,
                    error_kind: None,
                };
                self.usage.publish(usage.clone());
                Ok((text, usage))
            }
            Err(gateway_err) => {
                let orchestrator_err: OrchestratorError = gateway_err.into();
                self.usage.publish(TokenUsage {
                    role: self.role,
                    provider: self.provider_id.clone(),
                    model: self.model.clone(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    latency_ms,
                    success: false,
                    error_kind: Some(orchestrator_err.kind().to_string()),
                });
                Err(orchestrator_err)
            }
        }
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
