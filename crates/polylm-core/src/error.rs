//! Unified error type for the protocol engine.
//!
//! Every provider dialect maps its native in-band errors into
//! [`EngineError`], giving the rest of the engine a single type to match
//! against. Variants carry enough context for retry decisions and for
//! rendering a humanized, user-facing message.
//!
//! Per the error-handling design, most failures are *not* propagated as
//! `Err` through the stream path — in-band provider errors finalize the
//! turn as an error turn (preserving partial content), and single-event
//! parse errors are logged and skipped. `EngineError` values travel
//! inside those finalization paths and out of the few operations that
//! are genuinely fallible.

/// The unified error type for all engine operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A transport-level failure on the byte stream (connection reset,
    /// mid-body read error).
    #[error("stream transport error: {message}")]
    Transport {
        /// Human-readable description of the failure.
        message: String,
        /// Whether the caller may retry the request.
        retryable: bool,
    },

    /// An in-band error event from the provider (an error object arrived
    /// where a content delta was expected).
    #[error("provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"rate_limit_error"`).
        code: String,
        /// Human-readable error description from the provider.
        message: String,
        /// HTTP-style status associated with the error, if any.
        status: Option<http::StatusCode>,
        /// Whether the caller may retry the request.
        retryable: bool,
    },

    /// A payload could not be parsed as the expected shape.
    #[error("response format error: {message}")]
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw payload, for diagnostics.
        raw: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("request cancelled")]
    Cancelled,

    /// The operation exceeded its deadline.
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// The permission subsystem is structurally broken (module or schema
    /// fault). This is the one tool-pipeline failure allowed to
    /// propagate as fatal.
    #[error("permission subsystem failure: {0}")]
    PermissionFault(String),

    /// A tool-loop continuation exceeded its round budget.
    #[error("tool continuation exceeded {limit} rounds")]
    ContinuationExhausted {
        /// The configured maximum number of continuation rounds.
        limit: u32,
    },
}

impl EngineError {
    /// Returns `true` if the error is transient and the request may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Classifies an in-band provider error into an [`EngineError`],
    /// deriving retryability from the status/code.
    pub fn from_provider_event(code: &str, message: &str, status: Option<u16>) -> Self {
        let status = status.and_then(|s| http::StatusCode::from_u16(s).ok());
        let retryable = matches!(status.map(|s| s.as_u16()), Some(429 | 500..=599))
            || matches!(
                code,
                "rate_limit_error" | "overloaded_error" | "server_error" | "RESOURCE_EXHAUSTED"
            );
        Self::Provider {
            code: code.to_string(),
            message: message.to_string(),
            status,
            retryable,
        }
    }

    /// Renders a humanized, user-facing message for this error.
    ///
    /// Used as the text of the rendered error block appended to an error
    /// turn.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider { code, message, status, .. } => {
                let kind = match (status.map(|s| s.as_u16()), code.as_str()) {
                    (Some(429), _) | (_, "rate_limit_error" | "RESOURCE_EXHAUSTED") => {
                        "The provider is rate-limiting requests. Wait a moment and try again."
                    }
                    (Some(529), _) | (_, "overloaded_error") => {
                        "The provider is overloaded right now. Try again shortly."
                    }
                    (Some(500..=599), _) | (_, "server_error") => {
                        "The provider hit an internal error."
                    }
                    _ => "The provider returned an error.",
                };
                format!("{kind} ({code}: {message})")
            }
            Self::Transport { message, .. } => {
                format!("The connection to the provider was interrupted. ({message})")
            }
            Self::Timeout { elapsed_ms } => {
                format!("The request timed out after {elapsed_ms}ms.")
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

/// Formats a list of schema-violation messages into one readable block.
///
/// Used by tool argument validation to report every violated constraint
/// rather than just the first.
pub fn format_violations(tool: &str, violations: &[String]) -> String {
    let mut out = format!("Invalid arguments for tool '{tool}':");
    for v in violations {
        out.push_str("\n  - ");
        out.push_str(v);
    }
    out
}

/// Returns a copy of `text` truncated (on a char boundary) for log
/// lines.
pub fn truncate_for_log(text: &str, max: usize) -> String {
    let mut s = text.to_string();
    if s.len() > max {
        let mut cut = max;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}
