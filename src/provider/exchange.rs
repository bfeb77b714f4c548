use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpBodyStream, HttpRequest};
use crate::stream::{
    DEFAULT_MAX_CARRYOVER, DecoderState, FragmentExtractor, StreamFormat, collect_body_text,
};
use crate::types::VendorRequestBody;

use super::retry::{RetryPolicy, run_with_retry};

/// Vendor-specific mapping of an error status and body onto [`LLMError`].
pub(crate) type ErrorParser = fn(&'static str, u16, &str) -> LLMError;

/// Request plumbing shared by every adapter: serialization, retries, cancellation and
/// error-body logging.
#[derive(Clone)]
pub(crate) struct Exchange {
    vendor: &'static str,
    transport: DynHttpTransport,
    parse_error: ErrorParser,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_carryover: usize,
}

impl Exchange {
    pub(crate) fn new(
        vendor: &'static str,
        transport: DynHttpTransport,
        parse_error: ErrorParser,
    ) -> Self {
        Self {
            vendor,
            transport,
            parse_error,
            retry: RetryPolicy::default(),
            timeout: None,
            max_carryover: DEFAULT_MAX_CARRYOVER,
        }
    }

    /// Serializes the body once; every attempt re-sends the same bytes.
    pub(crate) fn request(
        &self,
        url: String,
        headers: HashMap<String, String>,
        body: &VendorRequestBody,
    ) -> Result<HttpRequest, LLMError> {
        let payload = serde_json::to_vec(body.payload()).map_err(|err| LLMError::Validation {
            message: format!("failed to serialize request: {err}"),
        })?;
        Ok(HttpRequest::post_json(url, payload)
            .with_headers(headers)
            .with_timeout(self.timeout))
    }

    /// Sends a buffered request and returns the success body.
    pub(crate) async fn post(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError> {
        run_with_retry(&self.retry, self.vendor, cancel, move || {
            let request = request.clone();
            self.attempt(request, cancel)
        })
        .await
    }

    /// Opens a streaming request and returns the raw body once the status is a success.
    pub(crate) async fn post_stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpBodyStream, LLMError> {
        run_with_retry(&self.retry, self.vendor, cancel, move || {
            let request = request.clone();
            self.attempt_stream(request, cancel)
        })
        .await
    }

    pub(crate) fn decoder(&self, format: StreamFormat, extract: FragmentExtractor) -> DecoderState {
        DecoderState::new(self.vendor, format, extract).with_max_carryover(self.max_carryover)
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LLMError::Cancelled),
            response = self.transport.send(request) => response?,
        };
        if response.is_success() {
            return response.into_string();
        }
        let text = String::from_utf8_lossy(&response.body);
        Err(self.failure(response.status, &text))
    }

    async fn attempt_stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpBodyStream, LLMError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LLMError::Cancelled),
            response = self.transport.send_stream(request) => response?,
        };
        if response.is_success() {
            return Ok(response.body);
        }
        let status = response.status;
        let text = collect_body_text(response.body, cancel).await?;
        Err(self.failure(status, &text))
    }

    fn failure(&self, status: u16, body: &str) -> LLMError {
        warn!(vendor = self.vendor, status, body, "vendor returned an error response");
        (self.parse_error)(self.vendor, status, body)
    }
}
