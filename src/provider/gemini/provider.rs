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

use super::error::parse_gemini_error;
use super::request::build_generate_body;
use super::response::{extract_chunk, extract_reply};

const VENDOR: &str = "gemini";

/// Google Gemini adapter. Streaming uses `alt=sse`, which has no end sentinel.
pub struct GeminiAdapter {
    exchange: Exchange,
    base_url: String,
    api_key: String,
    default_model: String,
    max_tokens: u32,
    temperature: f64,
}

impl GeminiAdapter {
    pub fn from_config(config: &VendorConfig, transport: DynHttpTransport) -> Self {
        let mut exchange = Exchange::new(VENDOR, transport, parse_gemini_error);
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

    pub(crate) fn endpoint(&self, model: &str, stream: bool) -> String {
        let path = if stream {
            format!("/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("/models/{model}:generateContent")
        };
        join_endpoint(&self.base_url, "/v1beta", &path)
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-goog-api-key".to_string(), self.api_key.clone());
        headers
    }

    fn resolve_model(&self, requested: Option<&str>) -> String {
        let model = resolve_model(VENDOR, requested, &self.default_model);
        match model.strip_prefix("models/") {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => model,
        }
    }
}

#[async_trait]
impl VendorAdapter for GeminiAdapter {
    fn build_body(
        &self,
        messages: &[NeutralMessage],
        options: &DispatchOptions,
        stream: bool,
    ) -> Result<VendorRequestBody, LLMError> {
        let prepared = normalize(messages, &RoleTable::GEMINI, options.supports_vision)?;
        let model = self.resolve_model(options.target_model.as_deref());
        let payload = build_generate_body(
            &prepared,
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
        let url = self.endpoint(body.model(), false);
        let request = self.exchange.request(url, self.build_headers(), body)?;
        let text = self.exchange.post(request, cancel).await?;
        extract_reply(VENDOR, &text)
    }

    async fn send_request_stream(
        &self,
        body: &VendorRequestBody,
        cancel: &CancellationToken,
    ) -> Result<TextStream, LLMError> {
        let url = self.endpoint(body.model(), true);
        let request = self.exchange.request(url, self.build_headers(), body)?;
        let raw = self.exchange.post_stream(request, cancel).await?;
        let decoder = self.exchange.decoder(StreamFormat::SSE, extract_chunk);
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
