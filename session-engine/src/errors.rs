//! Crate-wide error hierarchy for session-engine.
//!
//! The root [`SessionError`] follows the failure taxonomy the session layer
//! reasons about: transport failures, failures reported by the server in a
//! well-formed body, payloads of the wrong shape, and references to files or
//! commits that do not exist in the loaded changeset. Configuration problems
//! are grouped in [`ConfigError`]. Small env helpers return the unified
//! [`SessionResult`] alias.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type SessionResult<T> = Result<T, SessionError>;

/// Root error type for the session-engine crate.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request never completed or completed with a non-success status.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request completed, but the body reports a failure with a message.
    #[error("server reported failure: {0}")]
    ServerReported(String),

    /// The payload did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Referenced file index, commit or repository does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another operation currently owns the changeset identity.
    #[error("busy: {0}")]
    Busy(&'static str),

    /// Configuration problems (missing server URL, bad numbers, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Message suitable for a user-facing notification.
    ///
    /// Server-reported reasons are passed through verbatim; everything else
    /// collapses into a generic description of the failure class.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::ServerReported(reason) => reason.clone(),
            SessionError::Transport(_) => "could not reach the diff server".to_string(),
            SessionError::Decode(_) => "the diff server sent an unexpected response".to_string(),
            SessionError::NotFound(what) => format!("{what} no longer exists"),
            SessionError::Busy(what) => format!("{what} is in progress"),
            SessionError::Config(e) => e.to_string(),
        }
    }
}

/// Transport-level failure without a usable response body.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Timeout at transport level.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without HTTP status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// Upstream returned a non-successful HTTP status.
    #[error("HTTP {status} from {url}: {snippet}")]
    HttpStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Short snippet of the response body (trimmed).
        snippet: String,
    },
}

/// Configuration and setup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (poll interval, page size, timeouts).
    #[error("invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    /// Value had the wrong format (e.g., invalid URL).
    #[error("invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },

    /// Server-injected bootstrap blob was malformed or inconsistent.
    #[error("invalid bootstrap data: {0}")]
    InvalidBootstrap(String),

    /// The server did not enable an optional feature.
    #[error("feature disabled by the server: {0}")]
    FeatureDisabled(&'static str),
}

// ===== Conversions for `?` ergonomics at the crate root =====

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return SessionError::Decode(e.to_string());
        }
        SessionError::Transport(TransportError::from(e))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TransportError::Timeout;
        }

        if let Some(status) = e.status() {
            return TransportError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                snippet: String::new(),
            };
        }

        TransportError::Network(e.to_string())
    }
}

// ===== Env helpers =====

/// Fetches a required, non-empty environment variable.
pub fn must_env(name: &'static str) -> SessionResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name).into()),
    }
}

/// Parses an optional `u64` from env (`Ok(None)` if unset/empty).
pub fn env_opt_u64(name: &'static str) -> SessionResult<Option<u64>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse::<u64>().map(Some).map_err(|_| {
            SessionError::from(ConfigError::InvalidNumber {
                var: name,
                reason: "expected unsigned integer",
            })
        }),
        _ => Ok(None),
    }
}

/// Parses an optional boolean flag from env; accepts `1/0`, `true/false`,
/// `yes/no` and `on/off`.
pub fn env_opt_bool(name: &'static str) -> SessionResult<Option<bool>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidFormat {
                var: name,
                reason: "expected a boolean",
            }
            .into()),
        },
        _ => Ok(None),
    }
}

/// Validates that an HTTP endpoint starts with `http://` or `https://`.
pub fn validate_http_endpoint(var: &'static str, value: &str) -> SessionResult<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        }
        .into())
    }
}

/// Trims a response body to a short single-line snippet for error messages.
pub(crate) fn make_snippet(body: &str) -> String {
    body.chars()
        .take(240)
        .collect::<String>()
        .replace('\n', " ")
        .trim()
        .to_string()
}
