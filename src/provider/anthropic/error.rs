use crate::error::{LLMError, VendorErrorKind};

use super::types::{ErrorDetail, ErrorEnvelope};

/// Parses `{"type": "error", "error": {"type", "message"}}` bodies.
pub(crate) fn parse_claude_error(vendor: &'static str, status: u16, body: &str) -> LLMError {
    if let Ok(ErrorEnvelope { error: Some(error) }) = serde_json::from_str::<ErrorEnvelope>(body) {
        return into_vendor_error(vendor, status, error);
    }
    LLMError::vendor(vendor, status, format!("status {status}: {body}"))
}

pub(crate) fn into_vendor_error(vendor: &'static str, status: u16, error: ErrorDetail) -> LLMError {
    let kind_hint = error.kind.unwrap_or_default();
    let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
    if !kind_hint.is_empty() {
        message = format!("{message} ({kind_hint})");
    }
    let kind = VendorErrorKind::classify(status, &kind_hint);
    LLMError::vendor_kind(vendor, status, kind, message)
}
