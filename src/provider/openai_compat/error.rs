use serde_json::Value;

use crate::error::{LLMError, VendorErrorKind};

use super::types::{ErrorDetail, ErrorEnvelope};

/// Parses `{"error": {"message", "type", "code"}}` bodies returned by OpenAI-compatible
/// vendors.
pub(crate) fn parse_openai_error(vendor: &'static str, status: u16, body: &str) -> LLMError {
    if let Ok(ErrorEnvelope { error: Some(error) }) = serde_json::from_str::<ErrorEnvelope>(body) {
        return into_vendor_error(vendor, status, error);
    }
    LLMError::vendor(vendor, status, format!("status {status}: {body}"))
}

/// Maps an error object onto [`LLMError::Vendor`]; `status` is `0` for in-stream errors.
pub(crate) fn into_vendor_error(vendor: &'static str, status: u16, error: ErrorDetail) -> LLMError {
    let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
    let code = match &error.code {
        Some(Value::String(code)) => Some(code.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    if let Some(code) = &code {
        message = format!("{message} ({code})");
    }
    let hint = [error.kind.as_deref(), code.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    // In-stream errors carry no status, so the message is the only overload signal.
    let kind = if status == 0 {
        VendorErrorKind::classify(status, &format!("{hint} {message}"))
    } else {
        VendorErrorKind::classify(status, &hint)
    };
    LLMError::vendor_kind(vendor, status, kind, message)
}
