//! Protocol error types and response status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame length prefix: {0}")]
    InvalidLength(i32),

    #[error("unknown operation byte: {0}")]
    UnknownOperation(u8),

    #[error("connection closed mid-frame: expected {expected} bytes, got {read}")]
    Truncated { expected: usize, read: usize },

    #[error("unexpected operation {actual:?}, expected {expected:?}")]
    UnexpectedOperation {
        expected: crate::frame::Operation,
        actual: crate::frame::Operation,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    #[error("CBOR encode error: {0}")]
    Encode(String),

    #[error("CBOR decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the byte stream is still aligned on a frame boundary
    /// after this error, so the reader may keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownOperation(_)
                | ProtocolError::UnexpectedOperation { .. }
                | ProtocolError::Decode(_)
        )
    }
}

impl<T: fmt::Debug> From<ciborium::ser::Error<T>> for ProtocolError {
    fn from(err: ciborium::ser::Error<T>) -> Self {
        ProtocolError::Encode(err.to_string())
    }
}

impl<T: fmt::Debug> From<ciborium::de::Error<T>> for ProtocolError {
    fn from(err: ciborium::de::Error<T>) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}

/// Status codes carried by every response.
///
/// The numeric values are part of the wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum StatusCode {
    Success,
    UnknownFailure,
    Unauthorized,
    InvalidRequest,
    RequestPayloadTooLarge,
    ResourceNotFound,
    ServerTimeout,
    ResponsePayloadTooLarge,
    UnsupportedConnectVersion,
    UnexpectedOperation,
    UnsupportedProtocolVersion,
    InvalidProtocolVersion,
    FailedToConnect,
    NotEnoughMessages,
    MessageStoreReadError,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        *self == StatusCode::Success
    }

    /// Returns whether a failed call with this status may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatusCode::ServerTimeout
                | StatusCode::NotEnoughMessages
                | StatusCode::MessageStoreReadError
                | StatusCode::UnknownFailure
        )
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0 => StatusCode::Success,
            2 => StatusCode::Unauthorized,
            3 => StatusCode::InvalidRequest,
            4 => StatusCode::RequestPayloadTooLarge,
            5 => StatusCode::ResourceNotFound,
            6 => StatusCode::ServerTimeout,
            7 => StatusCode::ResponsePayloadTooLarge,
            8 => StatusCode::UnsupportedConnectVersion,
            9 => StatusCode::UnexpectedOperation,
            10 => StatusCode::UnsupportedProtocolVersion,
            11 => StatusCode::InvalidProtocolVersion,
            12 => StatusCode::FailedToConnect,
            13 => StatusCode::NotEnoughMessages,
            14 => StatusCode::MessageStoreReadError,
            // 1 and anything the client does not know about
            _ => StatusCode::UnknownFailure,
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Success => 0,
            StatusCode::UnknownFailure => 1,
            StatusCode::Unauthorized => 2,
            StatusCode::InvalidRequest => 3,
            StatusCode::RequestPayloadTooLarge => 4,
            StatusCode::ResourceNotFound => 5,
            StatusCode::ServerTimeout => 6,
            StatusCode::ResponsePayloadTooLarge => 7,
            StatusCode::UnsupportedConnectVersion => 8,
            StatusCode::UnexpectedOperation => 9,
            StatusCode::UnsupportedProtocolVersion => 10,
            StatusCode::InvalidProtocolVersion => 11,
            StatusCode::FailedToConnect => 12,
            StatusCode::NotEnoughMessages => 13,
            StatusCode::MessageStoreReadError => 14,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Success => "Success",
            StatusCode::UnknownFailure => "UnknownFailure",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::InvalidRequest => "InvalidRequest",
            StatusCode::RequestPayloadTooLarge => "RequestPayloadTooLarge",
            StatusCode::ResourceNotFound => "ResourceNotFound",
            StatusCode::ServerTimeout => "ServerTimeout",
            StatusCode::ResponsePayloadTooLarge => "ResponsePayloadTooLarge",
            StatusCode::UnsupportedConnectVersion => "UnsupportedConnectVersion",
            StatusCode::UnexpectedOperation => "UnexpectedOperation",
            StatusCode::UnsupportedProtocolVersion => "UnsupportedProtocolVersion",
            StatusCode::InvalidProtocolVersion => "InvalidProtocolVersion",
            StatusCode::FailedToConnect => "FailedToConnect",
            StatusCode::NotEnoughMessages => "NotEnoughMessages",
            StatusCode::MessageStoreReadError => "MessageStoreReadError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        for value in 0u8..=14 {
            let code = StatusCode::from(value);
            assert_eq!(u8::from(code), value);
        }
    }

    #[test]
    fn test_unrecognized_status_falls_back() {
        assert_eq!(StatusCode::from(99), StatusCode::UnknownFailure);
        assert_eq!(StatusCode::from(255), StatusCode::UnknownFailure);
    }

    #[test]
    fn test_status_code_retryable() {
        assert!(StatusCode::ServerTimeout.is_retryable());
        assert!(StatusCode::NotEnoughMessages.is_retryable());

        assert!(!StatusCode::ResourceNotFound.is_retryable());
        assert!(!StatusCode::InvalidRequest.is_retryable());
        assert!(!StatusCode::Unauthorized.is_retryable());
        assert!(!StatusCode::RequestPayloadTooLarge.is_retryable());
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::ResourceNotFound.to_string(), "ResourceNotFound");
        assert_eq!(StatusCode::NotEnoughMessages.to_string(), "NotEnoughMessages");
    }

    #[test]
    fn test_status_code_serializes_as_integer() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&StatusCode::ResourceNotFound, &mut buf).unwrap();
        let value: ciborium::Value = ciborium::de::from_reader(&buf[..]).unwrap();
        assert_eq!(value, ciborium::Value::Integer(5.into()));

        let parsed: StatusCode = ciborium::de::from_reader(&buf[..]).unwrap();
        assert_eq!(parsed, StatusCode::ResourceNotFound);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidLength(-3);
        assert!(err.to_string().contains("-3"));

        let err = ProtocolError::Truncated {
            expected: 10,
            read: 4,
        };
        assert!(err.to_string().contains("mid-frame"));

        assert!(ProtocolError::UnknownOperation(42).is_recoverable());
        assert!(!ProtocolError::InvalidLength(0).is_recoverable());
    }
}
