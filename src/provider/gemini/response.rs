use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::stream::Fragment;

use super::error::into_vendor_error;
use super::types::GenerateContentResponse;

/// Reads `candidates[0].content.parts[].text`.
///
/// A prompt blocked by safety filters has no candidates and is reported as an invalid
/// request.
pub(crate) fn extract_reply(vendor: &'static str, body: &str) -> Result<String, LLMError> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|err| LLMError::decode(vendor, format!("failed to parse response: {err}")))?;
    if let Some(text) = parsed.first_text() {
        return Ok(text);
    }
    if let Some(reason) = parsed
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(LLMError::vendor(
            vendor,
            400,
            format!("prompt blocked: {reason}"),
        ));
    }
    if parsed.candidates.is_empty() {
        return Err(LLMError::decode(vendor, "response contained no candidates"));
    }
    Ok(String::new())
}

/// Each SSE chunk is a full GenerateContentResponse; completion comes from the
/// connection closing.
pub(crate) fn extract_chunk(vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
    let chunk = GenerateContentResponse::deserialize(value)
        .map_err(|err| LLMError::decode(vendor, format!("unexpected chunk shape: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(into_vendor_error(vendor, 0, error));
    }
    Ok(chunk.first_text().map(Fragment::text).unwrap_or_default())
}
