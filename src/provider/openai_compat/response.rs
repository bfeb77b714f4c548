use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::stream::Fragment;

use super::error::into_vendor_error;
use super::types::{ChatCompletion, StreamChunk};

/// Extracts `choices[0].message.content` from a completion body.
pub(crate) fn extract_reply(vendor: &'static str, body: &str) -> Result<String, LLMError> {
    let parsed: ChatCompletion = serde_json::from_str(body)
        .map_err(|err| LLMError::decode(vendor, format!("failed to parse completion: {err}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::decode(vendor, "completion contained no choices"))?;
    Ok(choice
        .message
        .and_then(|message| message.content)
        .map(|content| content.into_text())
        .unwrap_or_default())
}

/// Extracts `choices[0].delta.content` from one streamed chunk.
///
/// Completion is signalled by the `[DONE]` sentinel, not by the chunk itself.
pub(crate) fn extract_delta(vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
    let chunk = StreamChunk::deserialize(value)
        .map_err(|err| LLMError::decode(vendor, format!("unexpected chunk shape: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(into_vendor_error(vendor, 0, error));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .map(|content| Fragment::text(content.into_text()))
        .unwrap_or_default())
}
