use serde_json::{Map, Value, json};

use crate::normalize::PreparedMessage;

/// Claude takes context turns through the top-level `system` field rather than as
/// messages.
pub(crate) fn build_messages_body(
    messages: &[PreparedMessage],
    model: &str,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
) -> Value {
    let (context, turns): (Vec<_>, Vec<_>) =
        messages.iter().partition(|message| message.is_context());

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    if !context.is_empty() {
        let system = context
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        body.insert("system".to_string(), Value::String(system));
    }
    body.insert(
        "messages".to_string(),
        Value::Array(turns.into_iter().map(convert_message).collect()),
    );
    body.insert("max_tokens".to_string(), Value::from(max_tokens));
    body.insert("temperature".to_string(), Value::from(temperature));
    body.insert("stream".to_string(), Value::Bool(stream));
    Value::Object(body)
}

fn convert_message(message: &PreparedMessage) -> Value {
    if message.attachments.is_empty() {
        return json!({ "role": message.role, "content": message.text });
    }
    let mut blocks: Vec<Value> = message
        .attachments
        .iter()
        .map(|attachment| {
            json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": attachment.mime_type,
                    "data": attachment.data,
                },
            })
        })
        .collect();
    blocks.push(json!({ "type": "text", "text": message.text }));
    json!({ "role": message.role, "content": blocks })
}
