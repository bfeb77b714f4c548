//! Conversion of neutral messages into the vendor-independent intermediate form every
//! adapter builds its wire body from.
//!
//! Role names are data ([`RoleTable`]) rather than per-vendor code. Ordering is turn
//! order and is never changed.

use std::fs;

use base64::{Engine as _, engine::general_purpose};

use crate::error::LLMError;
use crate::types::{FileAttachment, NeutralMessage, NeutralRole};

/// What happens to `tool` messages for a given vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolHandling {
    /// Tool output is discarded.
    Drop,
    /// Tool output is appended to the preceding message, or sent as a user turn when
    /// nothing precedes it.
    MergeIntoPrevious,
}

/// Vendor role names for each neutral role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTable {
    pub user: &'static str,
    pub bot: &'static str,
    pub context: &'static str,
    pub tool: ToolHandling,
}

impl RoleTable {
    /// Shared by every OpenAI-compatible vendor, Claude and Ollama.
    pub const CHAT: RoleTable = RoleTable {
        user: "user",
        bot: "assistant",
        context: "system",
        tool: ToolHandling::MergeIntoPrevious,
    };

    /// Gemini names the assistant `model` and has no slot for tool transcripts.
    pub const GEMINI: RoleTable = RoleTable {
        user: "user",
        bot: "model",
        context: "system",
        tool: ToolHandling::Drop,
    };

    /// Reka has no system role; context is sent as a user turn.
    pub const REKA: RoleTable = RoleTable {
        user: "user",
        bot: "assistant",
        context: "user",
        tool: ToolHandling::MergeIntoPrevious,
    };

    fn role_name(&self, role: NeutralRole) -> &'static str {
        match role {
            NeutralRole::User | NeutralRole::Tool => self.user,
            NeutralRole::Bot => self.bot,
            NeutralRole::Context => self.context,
        }
    }
}

/// Base64 payload of one attachment, ready to be inlined into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAttachment {
    pub mime_type: String,
    pub data: String,
}

impl InlineAttachment {
    /// `data:` URL form used by OpenAI-style image parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One message after filtering, role mapping and attachment materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    /// Neutral role kept so adapters can lift `context` turns into a system slot.
    pub source: NeutralRole,
    /// Vendor role name from the [`RoleTable`].
    pub role: &'static str,
    pub text: String,
    pub attachments: Vec<InlineAttachment>,
}

impl PreparedMessage {
    pub fn is_context(&self) -> bool {
        self.source == NeutralRole::Context
    }
}

/// Filters, maps and materializes a neutral conversation.
///
/// Messages with blank content are excluded. When `supports_vision` is set, file
/// attachments are read and base64-encoded synchronously; an unreadable file fails the
/// whole request with [`LLMError::FileEncoding`]. Without vision support files are
/// ignored entirely.
///
/// # Examples
///
/// ```
/// use relay_llm::normalize::{normalize, RoleTable};
/// use relay_llm::types::NeutralMessage;
///
/// let prepared = normalize(
///     &[NeutralMessage::context("Be brief"), NeutralMessage::bot("Hi"), NeutralMessage::user("")],
///     &RoleTable::GEMINI,
///     false,
/// )
/// .unwrap();
/// assert_eq!(prepared.len(), 2);
/// assert_eq!(prepared[1].role, "model");
/// ```
pub fn normalize(
    messages: &[NeutralMessage],
    table: &RoleTable,
    supports_vision: bool,
) -> Result<Vec<PreparedMessage>, LLMError> {
    let mut prepared: Vec<PreparedMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        if message.content.trim().is_empty() {
            continue;
        }

        if message.role == NeutralRole::Tool {
            match table.tool {
                ToolHandling::Drop => continue,
                ToolHandling::MergeIntoPrevious => {
                    if let Some(previous) = prepared.last_mut() {
                        previous.text.push_str("\n\n");
                        previous.text.push_str(&message.content);
                        continue;
                    }
                }
            }
        }

        let attachments = if supports_vision {
            message
                .files
                .iter()
                .map(materialize)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        prepared.push(PreparedMessage {
            source: message.role,
            role: table.role_name(message.role),
            text: message.content.clone(),
            attachments,
        });
    }
    Ok(prepared)
}

fn materialize(file: &FileAttachment) -> Result<InlineAttachment, LLMError> {
    let data = match &file.base64_payload {
        Some(payload) if !payload.is_empty() => payload.clone(),
        _ => {
            let bytes = fs::read(&file.path).map_err(|err| LLMError::FileEncoding {
                path: file.path.clone(),
                message: err.to_string(),
            })?;
            general_purpose::STANDARD.encode(bytes)
        }
    };
    let mime_type = if file.mime_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        file.mime_type.clone()
    };
    Ok(InlineAttachment { mime_type, data })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn maps_roles_and_preserves_order() {
        let messages = vec![
            NeutralMessage::context("rules"),
            NeutralMessage::user("one"),
            NeutralMessage::bot("two"),
            NeutralMessage::user("three"),
        ];
        let prepared = normalize(&messages, &RoleTable::CHAT, false).expect("prepared");
        let roles: Vec<_> = prepared.iter().map(|m| m.role).collect();
        let texts: Vec<_> = prepared.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(texts, vec!["rules", "one", "two", "three"]);
        assert!(prepared[0].is_context());
    }

    #[test]
    fn drops_blank_messages_and_keeps_duplicates() {
        let messages = vec![
            NeutralMessage::user("same"),
            NeutralMessage::bot("   "),
            NeutralMessage::user("same"),
        ];
        let prepared = normalize(&messages, &RoleTable::CHAT, false).expect("prepared");
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].text, prepared[1].text);
    }

    #[test]
    fn tool_messages_merge_or_drop_per_table() {
        let messages = vec![
            NeutralMessage::user("lookup"),
            NeutralMessage::tool("result: 42"),
            NeutralMessage::bot("done"),
        ];
        let merged = normalize(&messages, &RoleTable::CHAT, false).expect("merged");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "lookup\n\nresult: 42");

        let dropped = normalize(&messages, &RoleTable::GEMINI, false).expect("dropped");
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].text, "lookup");
    }

    #[test]
    fn leading_tool_message_becomes_user_turn() {
        let prepared =
            normalize(&[NeutralMessage::tool("orphan")], &RoleTable::CHAT, false).expect("ok");
        assert_eq!(prepared[0].role, "user");
    }

    #[test]
    fn files_are_ignored_without_vision() {
        let message = NeutralMessage::user("look")
            .with_file(FileAttachment::from_path("/definitely/missing.png", "image/png"));
        let prepared = normalize(&[message], &RoleTable::CHAT, false).expect("prepared");
        assert!(prepared[0].attachments.is_empty());
    }

    #[test]
    fn vision_reads_and_encodes_files() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"png-bytes").expect("write");
        let path = file.path().to_string_lossy().to_string();

        let message =
            NeutralMessage::user("look").with_file(FileAttachment::from_path(path, "image/png"));
        let prepared = normalize(&[message], &RoleTable::CHAT, true).expect("prepared");
        let attachment = &prepared[0].attachments[0];
        assert_eq!(attachment.data, general_purpose::STANDARD.encode(b"png-bytes"));
        assert_eq!(
            attachment.data_url(),
            format!("data:image/png;base64,{}", attachment.data)
        );
    }

    #[test]
    fn inline_payload_skips_file_read() {
        let mut file = FileAttachment::from_path("/definitely/missing.png", "image/png");
        file.base64_payload = Some("AAAA".to_string());
        let message = NeutralMessage::user("look").with_file(file);
        let prepared = normalize(&[message], &RoleTable::CHAT, true).expect("prepared");
        assert_eq!(prepared[0].attachments[0].data, "AAAA");
    }

    #[test]
    fn unreadable_file_is_a_file_encoding_error() {
        let message = NeutralMessage::user("look")
            .with_file(FileAttachment::from_path("/definitely/missing.png", "image/png"));
        let err = normalize(&[message], &RoleTable::CHAT, true).unwrap_err();
        match err {
            LLMError::FileEncoding { path, .. } => assert_eq!(path, "/definitely/missing.png"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
