//! # streammgr-protocol
//!
//! Wire protocol implementation for the stream manager daemon.
//!
//! This crate provides:
//! - Binary framing with a signed big-endian length prefix and an operation byte
//! - CBOR payload serialization with stable camelCase field names
//! - Request/Response payload types for every operation
//! - Message stream model types (definitions, export sinks, status)
//! - A recursive request validator that runs before anything is sent

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod model;
pub mod validation;

pub use codec::{read_frame, write_frame, Decoder, Encoder};
pub use error::{ProtocolError, StatusCode};
pub use frame::{check_packet_size, check_packet_size_within, Frame, Operation, LENGTH_PREFIX_SIZE};
pub use message::{new_request_id, Request, RequestPayload, Response};
pub use model::{
    ExportDefinition, HttpConfig, IoTAnalyticsConfig, KinesisConfig, Message,
    MessageStreamDefinition, MessageStreamInfo, Persistence, ReadMessagesOptions, StrategyOnFull,
};
pub use validation::{Validate, ValidationError};

/// Protocol version sent in the Connect handshake.
pub const PROTOCOL_VERSION: &str = "1.1.0";

/// Version of this client library, reported to the server during Connect.
pub const SDK_VERSION: &str = "1.1.0";

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 8088;

/// Maximum value of `len(payload) + 1` for a single frame (1 GiB).
pub const MAX_PACKET_SIZE: usize = 1 << 30;
