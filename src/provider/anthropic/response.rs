use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::stream::Fragment;

use super::error::into_vendor_error;
use super::types::{MessagesResponse, StreamEvent};

/// Concatenates every text block of a Messages API reply.
pub(crate) fn extract_reply(vendor: &'static str, body: &str) -> Result<String, LLMError> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|err| LLMError::decode(vendor, format!("failed to parse message: {err}")))?;
    Ok(parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect())
}

/// Handles one SSE `data:` payload. `message_stop` ends the stream.
pub(crate) fn extract_event(vendor: &'static str, value: &Value) -> Result<Fragment, LLMError> {
    let event = StreamEvent::deserialize(value)
        .map_err(|err| LLMError::decode(vendor, format!("unexpected event shape: {err}")))?;
    match event {
        StreamEvent::ContentBlockDelta { delta } if delta.kind == "text_delta" => {
            Ok(delta.text.map(Fragment::text).unwrap_or_default())
        }
        StreamEvent::MessageStop => Ok(Fragment::done()),
        StreamEvent::Error { error } => Err(into_vendor_error(vendor, 0, error)),
        _ => Ok(Fragment::empty()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stream::split_check::assert_split_invariant;
    use crate::stream::{DecoderState, StreamFormat};

    #[test]
    fn reply_joins_text_blocks() {
        let body = r#"{"id":"msg_1","type":"message","role":"assistant","content":[{"type":"text","text":"Hello"},{"type":"tool_use","id":"t","name":"x","input":{}},{"type":"text","text":" there"}],"stop_reason":"end_turn"}"#;
        assert_eq!(extract_reply("claude", body).expect("reply"), "Hello there");
    }

    #[test]
    fn events_map_to_fragments() {
        let delta = json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}});
        assert_eq!(extract_event("claude", &delta).expect("delta"), Fragment::text("Hi"));

        let json_delta = json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{"}});
        assert_eq!(extract_event("claude", &json_delta).expect("json"), Fragment::empty());

        let ping = json!({"type":"ping"});
        assert_eq!(extract_event("claude", &ping).expect("ping"), Fragment::empty());

        let stop = json!({"type":"message_stop"});
        assert_eq!(extract_event("claude", &stop).expect("stop"), Fragment::done());
    }

    #[test]
    fn error_event_is_overloaded_vendor_error() {
        let value = json!({"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}});
        let err = extract_event("claude", &value).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LLMError::Vendor { status: 0, .. }));
    }

    const CLAUDE_STREAM: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"content\":[]}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Grü\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ß dich \u{1F44B}\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    #[test]
    fn stream_survives_every_chunk_boundary() {
        assert_split_invariant(
            || DecoderState::new("claude", StreamFormat::SSE, extract_event),
            CLAUDE_STREAM.as_bytes(),
            &["Grü", "ß dich \u{1F44B}"],
        );
    }
}
