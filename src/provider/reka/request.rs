use serde_json::{Map, Value, json};

use crate::normalize::PreparedMessage;

/// Reka is always asked for a complete body; the caller's stream flag only changes how
/// the reply is delivered.
pub(crate) fn build_chat_body(
    messages: &[PreparedMessage],
    model: &str,
    max_tokens: u32,
    temperature: f64,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages.iter().map(convert_message).collect()),
    );
    body.insert("max_tokens".to_string(), Value::from(max_tokens));
    body.insert("temperature".to_string(), Value::from(temperature));
    body.insert("stream".to_string(), Value::Bool(false));
    Value::Object(body)
}

fn convert_message(message: &PreparedMessage) -> Value {
    let mut parts: Vec<Value> = message
        .attachments
        .iter()
        .map(|attachment| json!({ "type": "image_url", "image_url": attachment.data_url() }))
        .collect();
    parts.push(json!({ "type": "text", "text": message.text }));
    json!({ "role": message.role, "content": parts })
}
