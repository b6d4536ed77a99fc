//! Typed errors and the NotReady classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid setting {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("http client: {0}")]
    HttpClient(String),
}

/// Failure of a producer. Only [`FetchError::NotReady`] means "not attempted".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// A precondition was not met: the API is not built yet or a required input is missing.
    #[error("{0}")]
    NotReady(String),
    /// The backend answered with a non-success status.
    #[error("{message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },
    /// The request never produced a response (connect, timeout, body read).
    #[error("transport: {0}")]
    Transport(String),
    /// A response arrived but did not have the expected structure.
    #[error("{0}")]
    ShapeMismatch(String),
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn not_ready(message: impl Into<String>) -> Self {
        FetchError::NotReady(message.into())
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, FetchError::NotReady(_))
    }
}

/// Same as [`FetchError::not_ready`].
pub fn not_ready_error(message: impl Into<String>) -> FetchError {
    FetchError::not_ready(message)
}

/// True only for errors raised by precondition checks, never for remote failures.
pub fn is_not_ready_error(err: &FetchError) -> bool {
    err.is_not_ready()
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::ShapeMismatch(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Error envelope returned by the BFF on failure.
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn into_fetch_error(self, status: u16) -> FetchError {
        FetchError::Remote {
            status,
            code: self.error.code,
            message: self.error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_precondition_errors_are_not_ready() {
        assert!(is_not_ready_error(&not_ready_error("API not yet available")));
        assert!(!FetchError::Transport("connection refused".into()).is_not_ready());
        assert!(!FetchError::ShapeMismatch("Invalid response format".into()).is_not_ready());
        assert!(!FetchError::Cancelled.is_not_ready());
        let remote = FetchError::Remote {
            status: 404,
            code: "not_found".into(),
            message: "no such model".into(),
        };
        assert!(!remote.is_not_ready());
    }

    #[test]
    fn not_ready_message_is_verbatim() {
        let err = FetchError::not_ready("No model registeredModel id");
        assert_eq!(err.to_string(), "No model registeredModel id");
    }

    #[test]
    fn error_body_maps_to_remote() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":{"code":"bad_request","message":"invalid page size"}}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_fetch_error(400),
            FetchError::Remote {
                status: 400,
                code: "bad_request".into(),
                message: "invalid page size".into(),
            }
        );
    }
}
