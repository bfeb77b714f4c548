use crate::error::{LLMError, VendorErrorKind};

use super::types::{ErrorDetail, ErrorEnvelope};

/// Parses `{"error": {"code", "message", "status"}}` bodies.
///
/// The RPC status refines the HTTP one: `RESOURCE_EXHAUSTED` is a rate limit and
/// `UNAVAILABLE` an overload.
pub(crate) fn parse_gemini_error(vendor: &'static str, status: u16, body: &str) -> LLMError {
    // Streaming errors sometimes arrive wrapped in a one-element array.
    let trimmed = body.trim();
    let unwrapped = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if let Ok(ErrorEnvelope { error: Some(error) }) = serde_json::from_str(unwrapped) {
        return into_vendor_error(vendor, status, error);
    }
    LLMError::vendor(vendor, status, format!("status {status}: {body}"))
}

pub(crate) fn into_vendor_error(vendor: &'static str, status: u16, error: ErrorDetail) -> LLMError {
    let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
    let rpc_status = error.status.unwrap_or_default();
    if !rpc_status.is_empty() {
        message = format!("{message} ({rpc_status})");
    }
    let kind = VendorErrorKind::classify(status, &rpc_status);
    LLMError::vendor_kind(vendor, status, kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(err: LLMError) -> VendorErrorKind {
        match err {
            LLMError::Vendor { kind, .. } => kind,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rpc_status_refines_classification() {
        let exhausted = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            kind_of(parse_gemini_error("gemini", 429, exhausted)),
            VendorErrorKind::RateLimited
        );
        let unavailable = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            kind_of(parse_gemini_error("gemini", 503, unavailable)),
            VendorErrorKind::Overloaded
        );
        let invalid = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            kind_of(parse_gemini_error("gemini", 400, invalid)),
            VendorErrorKind::InvalidRequest
        );
    }

    #[test]
    fn array_wrapped_error_is_understood() {
        let body = r#"[{"error":{"code":404,"message":"models/nope is not found","status":"NOT_FOUND"}}]"#;
        let err = parse_gemini_error("gemini", 404, body);
        assert!(err.to_string().contains("models/nope is not found (NOT_FOUND)"));
        assert_eq!(kind_of(err), VendorErrorKind::NotFound);
    }
}
