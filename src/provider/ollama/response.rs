use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, VendorErrorKind};
use crate::stream::Fragment;

use super::types::ChatResponse;

pub(crate) fn extract_reply(vendor: &'static str, body: &str) -> Result<String, LLMError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| LLMError::decode(vendor, format!("failed to parse chat response: {err}")))?;
    if let Some(message) = parsed.error {
        return Err(in_band_error(vendor, message));
    }
    parsed
        .message
        .map(|message| message.content)
        .ok_or_else(|| LLMError::decode(vendor, "chat response contained no message"))
}

/// Handles one NDJSON line; `done: true` ends the stream.
pub(crate) fn extract_line(vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
    let line = ChatResponse::deserialize(value)
        .map_err(|err| LLMError::decode(vendor, format!("unexpected line shape: {err}")))?;
    if let Some(message) = line.error {
        return Err(in_band_error(vendor, message));
    }
    Ok(Fragment {
        text: line.message.map(|message| message.content),
        done: line.done,
    })
}

fn in_band_error(vendor: &'static str, message: String) -> LLMError {
    let kind = VendorErrorKind::classify(0, &message);
    LLMError::vendor_kind(vendor, 0, kind, message)
}
