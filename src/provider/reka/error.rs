use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, VendorErrorKind};

/// Reka reports failures as `{"detail": ...}`, where the detail is a string or a
/// validation error list.
pub(crate) fn parse_reka_error(vendor: &'static str, status: u16, body: &str) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<Value>,
    }

    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: Some(Value::String(detail)),
        }) => detail,
        Ok(ErrorBody {
            detail: Some(detail),
        }) => detail.to_string(),
        _ => format!("status {status}: {body}"),
    };
    let kind = VendorErrorKind::classify(status, "");
    LLMError::vendor_kind(vendor, status, kind, message)
}
