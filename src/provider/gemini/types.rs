use serde::Deserialize;

/// GenerateContentResponse, shared by the buffered reply and every streamed chunk.
#[derive(Debug, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    pub(crate) prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub(crate) error: Option<ErrorDetail>,
}

impl GenerateContentResponse {
    /// Text of the first candidate with its parts concatenated.
    pub(crate) fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        Some(
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Candidate {
    #[serde(default)]
    pub(crate) content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Part {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    pub(crate) block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: Option<ErrorDetail>,
}

/// Google RPC error object.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub(crate) message: Option<String>,
    /// RPC status such as `RESOURCE_EXHAUSTED`.
    #[serde(default)]
    pub(crate) status: Option<String>,
}
