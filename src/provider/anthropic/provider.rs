use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::VendorConfig;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::normalize::{RoleTable, normalize};
use crate::provider::exchange::Exchange;
use crate::provider::retry::RetryPolicy;
use crate::provider::{TextStream, VendorAdapter, join_endpoint, resolve_model};
use crate::stream::{StreamFormat, decode_increments};
use crate::types::{CapabilityDescriptor, DispatchOptions, NeutralMessage, VendorRequestBody};

use super::error::parse_claude_error;
use super::request::build_messages_body;
use super::response::{extract_event, extract_reply};

const VENDOR: &str = "claude";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
pub struct ClaudeAdapter {
    exchange: Exchange,
    base_url: String,
    api_key: String,
    version: String,
    default_model: String,
    max_tokens: u32,
    temperature: f64,
}

impl ClaudeAdapter {
    pub fn from_config(config: &VendorConfig, transport: DynHttpTransport) -> Self {
        let mut exchange = Exchange::new(VENDOR, transport, parse_claude_error);
        exchange.timeout = config.timeout();
        Self {
            exchange,
            base_url: config.base_url.clone(),
            api_key: config.api_key_or_empty().to_string(),
            version: DEFAULT_VERSION.to_string(),
            default_model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Overrides the `anthropic-version` header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
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
        join_endpoint(&self.base_url, "/v1", "/messages")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }
}

#[async_trait]
impl VendorAdapter for ClaudeAdapter {
    fn build_body(
        &self,
        messages: &[NeutralMessage],
        options: &DispatchOptions,
        stream: bool,
    ) -> Result<VendorRequestBody, LLMError> {
        let prepared = normalize(messages, &RoleTable::CHAT, options.supports_vision)?;
        let model = resolve_model(VENDOR, options.target_model.as_deref(), &self.default_model);
        let payload = build_messages_body(
            &prepared,
            &model,
            options.max_tokens.unwrap_or(self.max_tokens),
            options.temperature.unwrap_or(self.temperature),
            stream,
        );
        Ok(VendorRequestBody::new(VENDOR, model, stream, payload))
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
        extract_reply(VENDOR, &text)
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
        let decoder = self.exchange.decoder(StreamFormat::SSE, extract_event);
        Ok(decode_increments(raw, decoder, cancel.clone()))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_vision: true,
        }
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}
