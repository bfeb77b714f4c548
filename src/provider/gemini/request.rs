use serde_json::{Map, Value, json};

use crate::normalize::PreparedMessage;

/// Builds a GenerateContentRequest. The model travels in the URL, not the body.
pub(crate) fn build_generate_body(
    messages: &[PreparedMessage],
    max_tokens: u32,
    temperature: f64,
) -> Value {
    let (context, turns): (Vec<_>, Vec<_>) =
        messages.iter().partition(|message| message.is_context());

    let mut body = Map::new();
    body.insert(
        "contents".to_string(),
        Value::Array(turns.into_iter().map(convert_content).collect()),
    );
    if !context.is_empty() {
        // system_instruction only takes text, so every context turn folds into one part.
        let system_text = context
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        body.insert(
            "system_instruction".to_string(),
            json!({ "parts": [ { "text": system_text } ] }),
        );
    }
    body.insert(
        "generationConfig".to_string(),
        json!({ "maxOutputTokens": max_tokens, "temperature": temperature }),
    );
    Value::Object(body)
}

fn convert_content(message: &PreparedMessage) -> Value {
    let mut parts = vec![json!({ "text": message.text })];
    parts.extend(message.attachments.iter().map(|attachment| {
        json!({
            "inlineData": {
                "mimeType": attachment.mime_type,
                "data": attachment.data,
            }
        })
    }));
    json!({ "role": message.role, "parts": parts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{RoleTable, normalize};
    use crate::types::{FileAttachment, NeutralMessage};

    #[test]
    fn builds_contents_with_model_role_and_system_instruction() {
        let prepared = normalize(
            &[
                NeutralMessage::context("Be kind"),
                NeutralMessage::user("hi"),
                NeutralMessage::tool("ignored"),
                NeutralMessage::bot("hello"),
            ],
            &RoleTable::GEMINI,
            false,
        )
        .expect("prepared");
        let body = build_generate_body(&prepared, 200, 0.5);
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]}
                ],
                "system_instruction": {"parts": [{"text": "Be kind"}]},
                "generationConfig": {"maxOutputTokens": 200, "temperature": 0.5}
            })
        );
    }

    #[test]
    fn attachments_become_inline_data_parts() {
        let mut file = FileAttachment::from_path("/unused.webp", "image/webp");
        file.base64_payload = Some("UklG".to_string());
        let prepared = normalize(
            &[NeutralMessage::user("what?").with_file(file)],
            &RoleTable::GEMINI,
            true,
        )
        .expect("prepared");
        let body = build_generate_body(&prepared, 10, 0.0);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/webp");
        assert_eq!(parts[1]["inlineData"]["data"], "UklG");
    }
}
