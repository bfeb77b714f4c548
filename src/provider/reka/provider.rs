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

use super::error::parse_reka_error;
use super::request::build_chat_body;
use super::response::{extract_body, extract_reply};

const VENDOR: &str = "reka";

/// Reka chat adapter.
///
/// Streaming dispatches still issue a non-streaming call; the body is decoded as exactly
/// one increment.
pub struct RekaAdapter {
    exchange: Exchange,
    base_url: String,
    api_key: String,
    default_model: String,
    max_tokens: u32,
    temperature: f64,
}

impl RekaAdapter {
    pub fn from_config(config: &VendorConfig, transport: DynHttpTransport) -> Self {
        let mut exchange = Exchange::new(VENDOR, transport, parse_reka_error);
        exchange.timeout = config.timeout();
        Self {
            exchange,
            base_url: config.base_url.clone(),
            api_key: config.api_key_or_empty().to_string(),
            default_model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
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
        join_endpoint(&self.base_url, "/v1", "/chat")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), self.api_key.clone());
        headers
    }
}

#[async_trait]
impl VendorAdapter for RekaAdapter {
    fn build_body(
        &self,
        messages: &[NeutralMessage],
        options: &DispatchOptions,
        stream: bool,
    ) -> Result<VendorRequestBody, LLMError> {
        let prepared = normalize(messages, &RoleTable::REKA, options.supports_vision)?;
        let model = resolve_model(VENDOR, options.target_model.as_deref(), &self.default_model);
        let payload = build_chat_body(
            &prepared,
            &model,
            options.max_tokens.unwrap_or(self.max_tokens),
            options.temperature.unwrap_or(self.temperature),
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
        let decoder = self.exchange.decoder(StreamFormat::SingleBody, extract_body);
        Ok(decode_increments(raw, decoder, cancel.clone()))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: false,
            supports_vision: true,
        }
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}
