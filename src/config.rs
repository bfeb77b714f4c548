use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::Dispatcher;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynAdapter;
use crate::provider::anthropic::ClaudeAdapter;
use crate::provider::gemini::GeminiAdapter;
use crate::provider::ollama::OllamaAdapter;
use crate::provider::openai_compat::OpenAiCompatibleAdapter;
use crate::provider::reka::RekaAdapter;
use crate::provider::retry::RetryPolicy;
use crate::stream::DEFAULT_MAX_CARRYOVER;

/// Vendors the dispatcher knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
    Gemini,
    Groq,
    Mistral,
    Ollama,
    Reka,
}

impl VendorKind {
    pub const ALL: [VendorKind; 7] = [
        VendorKind::OpenAi,
        VendorKind::Claude,
        VendorKind::Gemini,
        VendorKind::Groq,
        VendorKind::Mistral,
        VendorKind::Ollama,
        VendorKind::Reka,
    ];

    /// Lower-case id used as the registry key.
    pub fn id(self) -> &'static str {
        match self {
            VendorKind::OpenAi => "openai",
            VendorKind::Claude => "claude",
            VendorKind::Gemini => "gemini",
            VendorKind::Groq => "groq",
            VendorKind::Mistral => "mistral",
            VendorKind::Ollama => "ollama",
            VendorKind::Reka => "reka",
        }
    }

    /// Environment variable prefix, e.g. `GROQ` for `GROQ_API_KEY`.
    pub fn env_prefix(self) -> &'static str {
        match self {
            VendorKind::OpenAi => "OPENAI",
            VendorKind::Claude => "CLAUDE",
            VendorKind::Gemini => "GEMINI",
            VendorKind::Groq => "GROQ",
            VendorKind::Mistral => "MISTRAL",
            VendorKind::Ollama => "OLLAMA",
            VendorKind::Reka => "REKA",
        }
    }

    /// Parses a vendor id, ignoring case and surrounding whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::VendorKind;
    ///
    /// assert_eq!(VendorKind::from_id(" Groq "), Some(VendorKind::Groq));
    /// assert_eq!(VendorKind::from_id("cohere"), None);
    /// ```
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(id.trim()))
    }

    /// Local daemons such as Ollama run without credentials.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, VendorKind::Ollama)
    }

    /// Vendors served by the shared OpenAI-compatible adapter.
    pub fn is_openai_compatible(self) -> bool {
        matches!(
            self,
            VendorKind::OpenAi | VendorKind::Groq | VendorKind::Mistral
        )
    }
}

/// Connection and default generation settings for one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorConfig {
    pub kind: VendorKind,
    /// Vendor root, with or without the version path segment.
    pub base_url: String,
    /// Optional only for vendors where [`VendorKind::requires_api_key`] is false.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used when a request names none.
    pub default_model: String,
    pub max_tokens: u32,
    /// Default sampling temperature in `[0, 1]`.
    pub temperature: f64,
    /// Per-request timeout; unset leaves the transport default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl VendorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// API key or the empty string for keyless vendors.
    pub fn api_key_or_empty(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn problems(&self) -> Vec<(String, String)> {
        let prefix = self.kind.env_prefix();
        let mut problems = Vec::new();
        if self.base_url.trim().is_empty() {
            problems.push((format!("{prefix}_BASE_URL"), "is required".to_string()));
        }
        if self.kind.requires_api_key()
            && self.api_key.as_deref().is_none_or(|key| key.trim().is_empty())
        {
            problems.push((format!("{prefix}_API_KEY"), "is required".to_string()));
        }
        if self.default_model.trim().is_empty() {
            problems.push((format!("{prefix}_MODEL"), "is required".to_string()));
        }
        if self.max_tokens == 0 {
            problems.push((format!("{prefix}_MAX_TOKENS"), "must be positive".to_string()));
        }
        if !self.temperature.is_finite() || !(0.0..=1.0).contains(&self.temperature) {
            problems.push((
                format!("{prefix}_TEMPERATURE"),
                format!("{} is outside [0, 1]", self.temperature),
            ));
        }
        problems
    }

    /// Checks required fields and value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] naming every offending field.
    pub fn validate(&self) -> Result<(), LLMError> {
        into_result(self.problems())
    }
}

/// Knobs shared by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Total attempts for transient vendor errors, including the first.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub retry_delay_ms: u64,
    /// Largest partial line the stream decoder holds before failing.
    pub max_carryover_bytes: usize,
    /// Capacity of the client channel used by the relay.
    pub relay_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            max_carryover_bytes: DEFAULT_MAX_CARRYOVER,
            relay_buffer: 32,
        }
    }
}

impl DispatchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// Startup configuration: one entry per enabled vendor plus shared settings.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use relay_llm::{DispatchConfig, VendorKind};
///
/// let vars = HashMap::from([
///     ("OLLAMA_BASE_URL", "http://localhost:11434"),
///     ("OLLAMA_MODEL", "llama3"),
///     ("OLLAMA_MAX_TOKENS", "256"),
///     ("OLLAMA_TEMPERATURE", "0.7"),
/// ]);
/// let config = DispatchConfig::from_lookup(&[VendorKind::Ollama], |name| {
///     vars.get(name).map(|value| value.to_string())
/// })?;
/// assert_eq!(config.vendors[0].default_model, "llama3");
/// assert_eq!(config.vendors[0].api_key, None);
/// assert_eq!(config.settings.max_attempts, 3);
/// # Ok::<(), relay_llm::LLMError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub vendors: Vec<VendorConfig>,
    #[serde(default)]
    pub settings: DispatchSettings,
}

impl DispatchConfig {
    /// Reads `<PREFIX>_*` variables from the process environment for each kind.
    pub fn from_env(kinds: &[VendorKind]) -> Result<Self, LLMError> {
        Self::from_lookup(kinds, |name| std::env::var(name).ok())
    }

    /// Same as [`DispatchConfig::from_env`] with an injectable variable lookup.
    ///
    /// Every missing or malformed variable across all vendors is reported in a single
    /// [`LLMError::InvalidConfig`].
    pub fn from_lookup<F>(kinds: &[VendorKind], lookup: F) -> Result<Self, LLMError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();
        let mut vendors = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            let prefix = kind.env_prefix();
            let var = |suffix: &str| {
                lookup(&format!("{prefix}_{suffix}"))
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            };

            let max_tokens =
                parse_var::<u32>(&var("MAX_TOKENS"), prefix, "MAX_TOKENS", &mut problems);
            let temperature =
                parse_var::<f64>(&var("TEMPERATURE"), prefix, "TEMPERATURE", &mut problems);
            let timeout_secs = match var("TIMEOUT_SECS") {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(secs) => Some(secs),
                    Err(err) => {
                        problems.push((format!("{prefix}_TIMEOUT_SECS"), err.to_string()));
                        None
                    }
                },
                None => None,
            };

            let vendor = VendorConfig {
                kind,
                base_url: var("BASE_URL").unwrap_or_default(),
                api_key: var("API_KEY"),
                default_model: var("MODEL").unwrap_or_default(),
                max_tokens: max_tokens.unwrap_or(1),
                temperature: temperature.unwrap_or(0.0),
                timeout_secs,
            };
            // Unparseable numbers are already reported; only add the remaining checks.
            problems.extend(vendor.problems().into_iter().filter(|(field, _)| {
                !(field.ends_with("_MAX_TOKENS") && max_tokens.is_none()
                    || field.ends_with("_TEMPERATURE") && temperature.is_none())
            }));
            vendors.push(vendor);
        }

        into_result(problems)?;
        Ok(Self {
            vendors,
            settings: DispatchSettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checks every vendor entry and rejects duplicate kinds.
    pub fn validate(&self) -> Result<(), LLMError> {
        let mut problems = Vec::new();
        for (index, vendor) in self.vendors.iter().enumerate() {
            if self.vendors[..index].iter().any(|seen| seen.kind == vendor.kind) {
                problems.push((
                    vendor.kind.id().to_string(),
                    "configured more than once".to_string(),
                ));
            }
            problems.extend(vendor.problems());
        }
        if self.settings.max_attempts == 0 {
            problems.push(("max_attempts".to_string(), "must be positive".to_string()));
        }
        if self.settings.relay_buffer == 0 {
            problems.push(("relay_buffer".to_string(), "must be positive".to_string()));
        }
        into_result(problems)
    }
}

fn parse_var<T>(
    raw: &Option<String>,
    prefix: &str,
    suffix: &str,
    problems: &mut Vec<(String, String)>,
) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let field = format!("{prefix}_{suffix}");
    match raw {
        None => {
            problems.push((field, "is required".to_string()));
            None
        }
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(err) => {
                problems.push((field, format!("{raw:?}: {err}")));
                None
            }
        },
    }
}

fn into_result(problems: Vec<(String, String)>) -> Result<(), LLMError> {
    if problems.is_empty() {
        return Ok(());
    }
    let field = problems
        .iter()
        .map(|(field, _)| field.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let reason = problems
        .iter()
        .map(|(field, reason)| format!("{field} {reason}"))
        .collect::<Vec<_>>()
        .join("; ");
    Err(LLMError::InvalidConfig { field, reason })
}

/// Validates `config` and registers one adapter per vendor under its lower-case id.
///
/// # Examples
///
/// ```
/// use relay_llm::http::reqwest::default_dyn_transport;
/// use relay_llm::{DispatchConfig, VendorConfig, VendorKind, build_dispatcher};
///
/// let config = DispatchConfig {
///     vendors: vec![VendorConfig {
///         kind: VendorKind::Groq,
///         base_url: "https://api.groq.com/openai".to_string(),
///         api_key: Some("gsk-test".to_string()),
///         default_model: "llama3-8b-8192".to_string(),
///         max_tokens: 512,
///         temperature: 0.2,
///         timeout_secs: Some(30),
///     }],
///     settings: Default::default(),
/// };
/// let dispatcher = build_dispatcher(&config, default_dyn_transport()?)?;
/// assert_eq!(dispatcher.vendors(), vec!["groq"]);
/// # Ok::<(), relay_llm::LLMError>(())
/// ```
///
/// # Errors
///
/// Returns [`LLMError::InvalidConfig`] listing every problem when validation fails.
pub fn build_dispatcher(
    config: &DispatchConfig,
    transport: DynHttpTransport,
) -> Result<Dispatcher, LLMError> {
    config.validate()?;
    let mut builder = Dispatcher::builder().relay_buffer(config.settings.relay_buffer);
    for vendor in &config.vendors {
        let adapter = build_adapter(vendor, &config.settings, transport.clone())?;
        builder = builder.register(adapter);
    }
    Ok(builder.build())
}

fn build_adapter(
    config: &VendorConfig,
    settings: &DispatchSettings,
    transport: DynHttpTransport,
) -> Result<DynAdapter, LLMError> {
    let retry = settings.retry_policy();
    let carryover = settings.max_carryover_bytes;
    let adapter: DynAdapter = match config.kind {
        VendorKind::OpenAi | VendorKind::Groq | VendorKind::Mistral => Arc::new(
            OpenAiCompatibleAdapter::from_config(config, transport)?
                .with_retry_policy(retry)
                .with_max_carryover(carryover),
        ),
        VendorKind::Claude => Arc::new(
            ClaudeAdapter::from_config(config, transport)
                .with_retry_policy(retry)
                .with_max_carryover(carryover),
        ),
        VendorKind::Gemini => Arc::new(
            GeminiAdapter::from_config(config, transport)
                .with_retry_policy(retry)
                .with_max_carryover(carryover),
        ),
        VendorKind::Ollama => Arc::new(
            OllamaAdapter::from_config(config, transport)
                .with_retry_policy(retry)
                .with_max_carryover(carryover),
        ),
        VendorKind::Reka => Arc::new(
            RekaAdapter::from_config(config, transport)
                .with_retry_policy(retry)
                .with_max_carryover(carryover),
        ),
    };
    Ok(adapter)
}
