//! Client error types.

use streammgr_protocol::{ProtocolError, StatusCode, ValidationError};
use thiserror::Error;

use crate::config::ConfigError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request was rejected locally and never sent.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    /// The reader loop stopped while the call was pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("request timeout")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("{code}: {message} (request {request_id})")]
    Status {
        code: StatusCode,
        message: String,
        request_id: String,
    },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Validation(e) => ClientError::Validation(e),
            ProtocolError::Io(e) => ClientError::Io(e),
            other => ClientError::Protocol(other),
        }
    }
}

impl ClientError {
    /// Builds the error for a non-success status.
    pub fn status(code: StatusCode, message: Option<&str>, request_id: &str) -> Self {
        ClientError::Status {
            code,
            message: message.unwrap_or_default().to_string(),
            request_id: request_id.to_string(),
        }
    }

    /// Returns the server status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::ConnectionLost(_) => true,
            ClientError::Status { code, .. } => code.is_retryable(),
            _ => false,
        }
    }

    /// Returns whether the server reported that the stream does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::ResourceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error() {
        let err = ClientError::status(StatusCode::ResourceNotFound, Some("no such stream"), "r1");
        assert_eq!(err.status_code(), Some(StatusCode::ResourceNotFound));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("no such stream"));
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionLost("eof".into()).is_retryable());
        assert!(ClientError::status(StatusCode::ServerTimeout, None, "r").is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
    }

    #[test]
    fn test_protocol_validation_unwrapped() {
        let err = ProtocolError::Validation(ValidationError::new(
            "DeleteMessageStreamRequest",
            "name",
            streammgr_protocol::validation::Constraint::MinLength { min: 1, actual: 0 },
        ));
        assert!(matches!(ClientError::from(err), ClientError::Validation(_)));
    }
}
