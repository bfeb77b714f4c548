//! Provider-neutral data structures handed to the dispatch core.
//!
//! Everything here is request-scoped: the conversation service builds the messages and
//! options for one turn, the core reads them, and nothing outlives the request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;

/// Author of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralRole {
    User,
    Bot,
    Context,
    Tool,
}

/// File attached to a message, only forwarded to vision-capable models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    /// Location on disk read when no inline payload is present.
    pub path: String,
    /// MIME type such as `image/png`.
    pub mime_type: String,
    /// Already encoded payload; skips the file read when set.
    #[serde(default)]
    pub base64_payload: Option<String>,
}

impl FileAttachment {
    /// References a file on disk that is read and encoded at normalization time.
    pub fn from_path(path: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            base64_payload: None,
        }
    }
}

/// Provider-independent representation of one conversation turn.
///
/// # Examples
///
/// ```
/// use relay_llm::types::{NeutralMessage, NeutralRole};
///
/// let msg = NeutralMessage::user("Describe the weather").with_id("m-1");
/// assert_eq!(msg.role, NeutralRole::User);
/// assert!(msg.files.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeutralMessage {
    /// Opaque id assigned by the conversation store.
    #[serde(default)]
    pub message_id: String,
    pub role: NeutralRole,
    pub content: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    /// Provider/model tag such as `groq/llama3-8b-8192`.
    #[serde(default)]
    pub model_name: Option<String>,
}

impl NeutralMessage {
    pub fn new(role: NeutralRole, content: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            role,
            content: content.into(),
            files: Vec::new(),
            model_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(NeutralRole::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(NeutralRole::Bot, content)
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self::new(NeutralRole::Context, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(NeutralRole::Tool, content)
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }
}

/// Per-request generation options. Unset numbers fall back to the adapter defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    /// Vendor model id, optionally tagged as `<vendor>/<model>`.
    #[serde(default)]
    pub target_model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub supports_vision: bool,
}

impl DispatchOptions {
    /// Rejects zero token budgets and temperatures outside `[0, 1]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::DispatchOptions;
    ///
    /// let options = DispatchOptions {
    ///     temperature: Some(0.3),
    ///     ..DispatchOptions::default()
    /// };
    /// assert!(options.validate().is_ok());
    ///
    /// let options = DispatchOptions {
    ///     max_tokens: Some(0),
    ///     ..DispatchOptions::default()
    /// };
    /// assert!(options.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), LLMError> {
        if self.max_tokens == Some(0) {
            return Err(LLMError::Validation {
                message: "max_tokens must be positive".to_string(),
            });
        }
        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || !(0.0..=1.0).contains(&temperature) {
                return Err(LLMError::Validation {
                    message: format!("temperature {temperature} is outside [0, 1]"),
                });
            }
        }
        Ok(())
    }
}

/// Whether the caller wants the full reply at once or incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Sync,
    Stream,
}

/// Inbound dispatch contract consumed from the controller layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    /// Vendor id, matched case-insensitively.
    pub vendor: String,
    pub messages: Vec<NeutralMessage>,
    #[serde(default)]
    pub options: DispatchOptions,
    #[serde(default)]
    pub mode: OutputMode,
}

impl DispatchRequest {
    /// Sync request with default options.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::{DispatchRequest, NeutralMessage, OutputMode};
    ///
    /// let request = DispatchRequest::new("groq", vec![NeutralMessage::user("hi")]).streaming();
    /// assert_eq!(request.mode, OutputMode::Stream);
    /// assert!(request.options.target_model.is_none());
    /// ```
    pub fn new(vendor: impl Into<String>, messages: Vec<NeutralMessage>) -> Self {
        Self {
            vendor: vendor.into(),
            messages,
            options: DispatchOptions::default(),
            mode: OutputMode::Sync,
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.mode = OutputMode::Stream;
        self
    }
}

/// Result of a dispatch once the request reached an adapter.
pub enum DispatchReply {
    /// Complete reply text of a sync dispatch.
    Text(String),
    /// Lazy, finite sequence of increments of a streaming dispatch.
    Stream(crate::provider::TextStream),
    /// The request was cancelled; nothing should be reported to the user.
    Cancelled,
}

impl std::fmt::Debug for DispatchReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Capabilities advertised by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// The vendor emits incremental chunks rather than one body.
    pub supports_stream: bool,
    /// The vendor accepts inline image parts.
    pub supports_vision: bool,
}

/// Vendor wire body built once per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequestBody {
    vendor: &'static str,
    model: String,
    stream: bool,
    payload: Value,
}

impl VendorRequestBody {
    pub(crate) fn new(vendor: &'static str, model: String, stream: bool, payload: Value) -> Self {
        Self {
            vendor,
            model,
            stream,
            payload,
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    /// Vendor-side model id after mapping.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the body was built for a streaming call.
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
