//! # streammgr-client
//!
//! Async client for the stream manager daemon.
//!
//! This crate provides:
//! - TCP and Unix socket transports with the Connect handshake
//! - A background reader that correlates responses to concurrent callers
//! - A typed API for creating, deleting, describing, appending to, reading
//!   from and listing message streams
//! - YAML/environment configuration

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod stream;

pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionConfig, Endpoint, ServerInfo};
pub use error::ClientError;
