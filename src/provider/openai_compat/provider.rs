use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{VendorConfig, VendorKind};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::normalize::{RoleTable, normalize};
use crate::provider::exchange::Exchange;
use crate::provider::retry::RetryPolicy;
use crate::provider::{TextStream, VendorAdapter, join_endpoint, resolve_model};
use crate::stream::{StreamFormat, decode_increments};
use crate::types::{CapabilityDescriptor, DispatchOptions, NeutralMessage, VendorRequestBody};

use super::error::parse_openai_error;
use super::request::{Sampling, build_chat_body};
use super::response::{extract_delta, extract_reply};

/// Chat Completions adapter for OpenAI and the vendors that clone its API.
pub struct OpenAiCompatibleAdapter {
    kind: VendorKind,
    exchange: Exchange,
    base_url: String,
    api_key: String,
    default_model: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiCompatibleAdapter {
    /// Builds the adapter for `config.kind`, which must be OpenAI, Groq or Mistral.
    pub fn from_config(
        config: &VendorConfig,
        transport: DynHttpTransport,
    ) -> Result<Self, LLMError> {
        if !config.kind.is_openai_compatible() {
            return Err(LLMError::InvalidConfig {
                field: config.kind.id().to_string(),
                reason: "not an OpenAI-compatible vendor".to_string(),
            });
        }
        let mut exchange = Exchange::new(config.kind.id(), transport, parse_openai_error);
        exchange.timeout = config.timeout();
        Ok(Self {
            kind: config.kind,
            exchange,
            base_url: config.base_url.clone(),
            api_key: config.api_key_or_empty().to_string(),
            default_model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.exchange.retry = policy;
        self
    }

    pub fn with_max_carryover(mut self, bytes: usize) -> Self {
        self.exchange.max_carryover = bytes;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        join_endpoint(&self.base_url, "/v1", "/chat/completions")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    fn sampling(&self, options: &DispatchOptions) -> Sampling {
        let max_tokens_field = match self.kind {
            VendorKind::OpenAi => "max_completion_tokens",
            _ => "max_tokens",
        };
        Sampling {
            max_tokens_field,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
        }
    }
}

#[async_trait]
impl VendorAdapter for OpenAiCompatibleAdapter {
    fn build_body(
        &self,
        messages: &[NeutralMessage],
        options: &DispatchOptions,
        stream: bool,
    ) -> Result<VendorRequestBody, LLMError> {
        let prepared = normalize(messages, &RoleTable::CHAT, options.supports_vision)?;
        let model = resolve_model(
            self.name(),
            options.target_model.as_deref(),
            &self.default_model,
        );
        let payload = build_chat_body(&prepared, &model, self.sampling(options), stream);
        Ok(VendorRequestBody::new(self.name(), model, stream, payload))
    }

    async fn send_request(
        &self,
        body: &VendorRequestBody,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError> {
        let request = self
            .exchange
            .request(self.endpoint(), self.build_headers(), body)?;
        let text = self.exchange.post(request, cancel).await?;
        extract_reply(self.name(), &text)
    }

    async fn send_request_stream(
        &self,
        body: &VendorRequestBody,
        cancel: &CancellationToken,
    ) -> Result<TextStream, LLMError> {
        let request = self
            .exchange
            .request(self.endpoint(), self.build_headers(), body)?;
        let raw = self.exchange.post_stream(request, cancel).await?;
        let decoder = self.exchange.decoder(StreamFormat::SSE_DONE, extract_delta);
        Ok(decode_increments(raw, decoder, cancel.clone()))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_vision: true,
        }
    }

    fn name(&self) -> &'static str {
        self.kind.id()
    }
}
