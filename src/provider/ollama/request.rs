use serde_json::{Map, Value, json};

use crate::normalize::PreparedMessage;

pub(crate) fn build_chat_body(
    messages: &[PreparedMessage],
    model: &str,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages.iter().map(convert_message).collect()),
    );
    body.insert("stream".to_string(), Value::Bool(stream));
    body.insert(
        "options".to_string(),
        json!({ "num_predict": max_tokens, "temperature": temperature }),
    );
    Value::Object(body)
}

/// Images travel as bare base64 strings next to the text.
fn convert_message(message: &PreparedMessage) -> Value {
    let mut value = json!({ "role": message.role, "content": message.text });
    if !message.attachments.is_empty() {
        let images: Vec<&str> = message
            .attachments
            .iter()
            .map(|attachment| attachment.data.as_str())
            .collect();
        value["images"] = json!(images);
    }
    value
}
