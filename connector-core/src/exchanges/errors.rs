//! Exchange error types

use serde_json::Value;
use thiserror::Error;

/// Custom result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// No response was obtained: DNS failure, timeout, refused or reset connection.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The exchange answered with a non-success status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: Value },

    /// The response arrived but did not have the expected shape.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Recoverable,
    Fatal,
}

impl ExchangeError {
    pub fn data(details: impl Into<String>) -> Self {
        Self::Data(details.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Fatal,
            _ => ErrorKind::Recoverable,
        }
    }

    /// True when the outcome of the request is unknown rather than refused.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Exchange-specific error code carried in an API error body, if any.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { body, .. } => body.get("code").and_then(Value::as_i64),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Data(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport { message: err.to_string() }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        Self::Transport { message }
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid url: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ExchangeError::Config("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(ExchangeError::data("bad").kind(), ErrorKind::Recoverable);

        let transport = ExchangeError::Transport { message: "reset".into() };
        assert!(transport.is_transient());
        assert!(!ExchangeError::data("bad").is_transient());
    }

    #[test]
    fn test_api_code_extraction() {
        let err = ExchangeError::Api {
            status: 400,
            body: json!({"code": -1121, "msg": "Invalid symbol."}),
        };
        assert_eq!(err.api_code(), Some(-1121));
        assert!(err.to_string().contains("400"));
    }
}
