use thiserror::Error;

/// Classification of a non-success reply returned by a vendor.
///
/// Each adapter maps its own status codes and error `type` strings onto this set so the
/// retry policy can stay vendor-neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorErrorKind {
    /// Invalid or missing credentials.
    Auth,
    /// The vendor throttled the caller.
    RateLimited,
    /// The vendor is temporarily over capacity.
    Overloaded,
    /// The vendor rejected the request payload.
    InvalidRequest,
    /// Unknown model or endpoint.
    NotFound,
    /// Any other 5xx failure.
    Server,
    /// Anything the adapter could not classify.
    Other,
}

impl VendorErrorKind {
    /// Default classification from an HTTP status alone.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimited,
            503 | 529 => Self::Overloaded,
            400 | 413 | 422 => Self::InvalidRequest,
            404 => Self::NotFound,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Refines the status classification with a vendor error `type`/`status` string or
    /// message, since several vendors report overload inside a 200 stream or under a
    /// generic status.
    pub fn classify(status: u16, hint: &str) -> Self {
        let hint = hint.to_ascii_lowercase();
        if hint.contains("overloaded")
            || hint.contains("over capacity")
            || hint.contains("unavailable")
        {
            Self::Overloaded
        } else if hint.contains("rate_limit")
            || hint.contains("rate limit")
            || hint.contains("resource_exhausted")
        {
            Self::RateLimited
        } else {
            Self::from_status(status)
        }
    }

    /// Returns `true` for the transient classes the retry policy may repeat.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Overloaded)
    }
}

/// Aggregates every failure mode exposed by the dispatch core.
///
/// Only [`LLMError::Vendor`] errors with a transient [`VendorErrorKind`] are ever retried.
/// [`LLMError::Cancelled`] is not a failure from the user's point of view: the dispatch
/// boundary swallows it and simply ends the interaction.
#[derive(Debug, Error)]
pub enum LLMError {
    /// No adapter is registered for the requested vendor id.
    #[error("unsupported vendor: {vendor}")]
    UnsupportedVendor { vendor: String },
    /// The vendor answered with a non-success status or an in-band error payload.
    #[error("vendor {vendor} error (status {status}): {message}")]
    Vendor {
        /// Vendor id such as `groq`.
        vendor: &'static str,
        /// HTTP status, or `0` for errors reported inside an open stream.
        status: u16,
        /// Adapter-specific classification of the failure.
        kind: VendorErrorKind,
        /// Message extracted from the vendor error body.
        message: String,
    },
    /// Network-level failure while sending or reading.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// A payload the decoder cannot recover from even after carryover buffering.
    #[error("decode error from {vendor}: {message}")]
    Decode {
        vendor: &'static str,
        message: String,
    },
    /// Client- or system-initiated abort.
    #[error("request cancelled")]
    Cancelled,
    /// A vision attachment could not be read or encoded.
    #[error("failed to encode attachment {path}: {message}")]
    FileEncoding { path: String, message: String },
    /// Signals validation failures in the request payload or options.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when startup configuration is missing or malformed.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Decode`] for the given vendor.
    pub fn decode<T: Into<String>>(vendor: &'static str, message: T) -> Self {
        Self::Decode {
            vendor,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Vendor`] classified from the HTTP status.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::error::{LLMError, VendorErrorKind};
    ///
    /// let err = LLMError::vendor("groq", 503, "over capacity");
    /// assert!(err.is_retryable());
    /// assert!(matches!(err, LLMError::Vendor { kind: VendorErrorKind::Overloaded, .. }));
    /// ```
    pub fn vendor<T: Into<String>>(vendor: &'static str, status: u16, message: T) -> Self {
        Self::Vendor {
            vendor,
            status,
            kind: VendorErrorKind::from_status(status),
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Vendor`] with an explicit classification.
    pub fn vendor_kind<T: Into<String>>(
        vendor: &'static str,
        status: u16,
        kind: VendorErrorKind,
        message: T,
    ) -> Self {
        Self::Vendor {
            vendor,
            status,
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` when the error matches a transient overload signature.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Vendor { kind, .. } if kind.is_transient())
    }

    /// Returns `true` for [`LLMError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status the calling layer should answer with.
    ///
    /// `Cancelled` maps to the non-standard 499 so it can be logged, but callers are
    /// expected to swallow it instead of reporting it to the user.
    pub fn client_status(&self) -> u16 {
        match self {
            Self::UnsupportedVendor { .. } | Self::FileEncoding { .. } | Self::Validation { .. } => {
                400
            }
            Self::Vendor {
                kind: VendorErrorKind::InvalidRequest,
                ..
            } => 400,
            Self::Vendor {
                kind: VendorErrorKind::RateLimited,
                ..
            } => 429,
            Self::Vendor {
                kind: VendorErrorKind::Overloaded,
                ..
            } => 503,
            Self::Vendor { .. } | Self::Transport { .. } | Self::Decode { .. } => 502,
            Self::Cancelled => 499,
            Self::InvalidConfig { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_overload_and_rate_limit_are_retryable() {
        assert!(LLMError::vendor("openai", 429, "slow down").is_retryable());
        assert!(LLMError::vendor("claude", 529, "overloaded").is_retryable());
        assert!(!LLMError::vendor("openai", 401, "bad key").is_retryable());
        assert!(!LLMError::vendor("openai", 500, "boom").is_retryable());
        assert!(!LLMError::transport("reset").is_retryable());
        assert!(!LLMError::Cancelled.is_retryable());
    }

    #[test]
    fn classify_prefers_vendor_hints_over_status() {
        assert_eq!(
            VendorErrorKind::classify(200, "overloaded_error"),
            VendorErrorKind::Overloaded
        );
        assert_eq!(
            VendorErrorKind::classify(400, "RESOURCE_EXHAUSTED"),
            VendorErrorKind::RateLimited
        );
        assert_eq!(
            VendorErrorKind::classify(401, "invalid_api_key"),
            VendorErrorKind::Auth
        );
    }

    #[test]
    fn client_status_maps_taxonomy() {
        let unsupported = LLMError::UnsupportedVendor {
            vendor: "x".to_string(),
        };
        assert_eq!(unsupported.client_status(), 400);
        assert_eq!(LLMError::vendor("gemini", 400, "bad").client_status(), 400);
        assert_eq!(LLMError::vendor("gemini", 401, "key").client_status(), 502);
        assert_eq!(LLMError::decode("ollama", "junk").client_status(), 502);
        assert_eq!(LLMError::Cancelled.client_status(), 499);
    }
}
