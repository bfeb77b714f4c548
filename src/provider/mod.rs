use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::types::{CapabilityDescriptor, DispatchOptions, NeutralMessage, VendorRequestBody};

pub mod anthropic;
pub(crate) mod exchange;
pub mod gemini;
pub mod ollama;
pub mod openai_compat;
pub mod reka;
pub mod retry;

/// Lazy, finite, non-restartable sequence of reply increments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Contract implemented once per vendor. Registering an implementation with the
/// [`crate::client::Dispatcher`] is the only step needed to add a vendor.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Normalizes the conversation and builds the vendor wire body.
    ///
    /// Attachment files are read here, so an unreadable file fails before any network call.
    fn build_body(
        &self,
        messages: &[NeutralMessage],
        options: &DispatchOptions,
        stream: bool,
    ) -> Result<VendorRequestBody, LLMError>;

    /// Issues one call (plus transient retries) and extracts the reply text.
    async fn send_request(
        &self,
        body: &VendorRequestBody,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError>;

    /// Opens a streaming call and returns the decoded increments.
    async fn send_request_stream(
        &self,
        body: &VendorRequestBody,
        cancel: &CancellationToken,
    ) -> Result<TextStream, LLMError>;

    fn capabilities(&self) -> CapabilityDescriptor;

    /// Lower-case vendor id.
    fn name(&self) -> &'static str;
}

/// Thread-safe adapter handle.
pub type DynAdapter = Arc<dyn VendorAdapter>;

/// Maps the requested model tag onto the vendor model id.
///
/// Blank requests fall back to `default_model`; a `<vendor>/` prefix is stripped.
pub(crate) fn resolve_model(vendor: &str, requested: Option<&str>, default_model: &str) -> String {
    let Some(requested) = requested.map(str::trim).filter(|model| !model.is_empty()) else {
        return default_model.to_string();
    };
    match requested.split_once('/') {
        Some((prefix, model)) if prefix.eq_ignore_ascii_case(vendor) && !model.is_empty() => {
            model.to_string()
        }
        _ => requested.to_string(),
    }
}

/// Joins a base URL and an API path, tolerating a base that already ends in the version
/// segment.
pub(crate) fn join_endpoint(base_url: &str, version: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with(version) {
        format!("{base}{path}")
    } else {
        format!("{base}{version}{path}")
    }
}
