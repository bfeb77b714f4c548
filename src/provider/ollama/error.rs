use serde::Deserialize;

use crate::error::{LLMError, VendorErrorKind};

/// Parses `{"error": "..."}` bodies.
pub(crate) fn parse_ollama_error(vendor: &'static str, status: u16, body: &str) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(message),
        }) => {
            let kind = VendorErrorKind::classify(status, &message);
            LLMError::vendor_kind(vendor, status, kind, message)
        }
        _ => LLMError::vendor(vendor, status, format!("status {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_error_string() {
        match parse_ollama_error("ollama", 404, r#"{"error":"model 'llama9' not found"}"#) {
            LLMError::Vendor { kind, message, .. } => {
                assert_eq!(kind, VendorErrorKind::NotFound);
                assert_eq!(message, "model 'llama9' not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn busy_server_is_transient() {
        assert!(parse_ollama_error("ollama", 503, r#"{"error":"server busy"}"#).is_retryable());
    }
}
