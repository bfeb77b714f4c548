use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::stream::Fragment;

use super::types::ChatResponse;

/// Reads `responses[0].message.content`.
pub(crate) fn extract_reply(vendor: &'static str, body: &str) -> Result<String, LLMError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| LLMError::decode(vendor, format!("failed to parse chat response: {err}")))?;
    extract_text(vendor, &value)
}

/// Extractor for the single-body stream decoder: the whole reply is one increment.
pub(crate) fn extract_body(vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
    Ok(Fragment {
        text: Some(extract_text(vendor, value)?),
        done: true,
    })
}

fn extract_text(vendor: &'static str, value: &Value) -> Result<String, LLMError> {
    let parsed = ChatResponse::deserialize(value)
        .map_err(|err| LLMError::decode(vendor, format!("unexpected response shape: {err}")))?;
    let choice = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::decode(vendor, "response contained no choices"))?;
    Ok(choice
        .message
        .and_then(|message| message.content)
        .map(|content| content.into_text())
        .unwrap_or_default())
}
