use serde_json::{Map, Value, json};

use crate::normalize::PreparedMessage;

/// Sampling parameters resolved from the options and the adapter defaults.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sampling {
    /// OpenAI renamed the token budget; compatible vendors still use `max_tokens`.
    pub(crate) max_tokens_field: &'static str,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
}

pub(crate) fn build_chat_body(
    messages: &[PreparedMessage],
    model: &str,
    sampling: Sampling,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages.iter().map(convert_message).collect()),
    );
    body.insert(
        sampling.max_tokens_field.to_string(),
        Value::from(sampling.max_tokens),
    );
    body.insert("temperature".to_string(), Value::from(sampling.temperature));
    body.insert("stream".to_string(), Value::Bool(stream));
    Value::Object(body)
}

fn convert_message(message: &PreparedMessage) -> Value {
    if message.attachments.is_empty() {
        return json!({ "role": message.role, "content": message.text });
    }
    let mut parts = vec![json!({ "type": "text", "text": message.text })];
    parts.extend(message.attachments.iter().map(|attachment| {
        json!({
            "type": "image_url",
            "image_url": { "url": attachment.data_url() },
        })
    }));
    json!({ "role": message.role, "content": parts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::InlineAttachment;
    use crate::types::NeutralRole;

    fn prepared(role: &'static str, text: &str) -> PreparedMessage {
        PreparedMessage {
            source: NeutralRole::User,
            role,
            text: text.to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn builds_plain_chat_body() {
        let sampling = Sampling {
            max_tokens_field: "max_tokens",
            max_tokens: 64,
            temperature: 0.5,
        };
        let body = build_chat_body(
            &[prepared("system", "be brief"), prepared("user", "hi")],
            "llama3-8b-8192",
            sampling,
            true,
        );
        assert_eq!(
            body,
            json!({
                "model": "llama3-8b-8192",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "max_tokens": 64,
                "temperature": 0.5,
                "stream": true
            })
        );
    }

    #[test]
    fn inlines_images_as_data_urls() {
        let mut message = prepared("user", "what is this?");
        message.attachments.push(InlineAttachment {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        });
        let sampling = Sampling {
            max_tokens_field: "max_completion_tokens",
            max_tokens: 16,
            temperature: 0.0,
        };
        let body = build_chat_body(&[message], "gpt-4o-mini", sampling, false);
        assert_eq!(body["max_completion_tokens"], 16);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0], json!({"type": "text", "text": "what is this?"}));
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn temperature_is_sent_without_float_widening_noise() {
        let sampling = Sampling {
            max_tokens_field: "max_tokens",
            max_tokens: 16,
            temperature: 0.7,
        };
        let body = build_chat_body(&[prepared("user", "hi")], "mistral-small", sampling, false);
        assert_eq!(body["temperature"], json!(0.7));
        assert_eq!(body["temperature"].to_string(), "0.7");
    }
}
