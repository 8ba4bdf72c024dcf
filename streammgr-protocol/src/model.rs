//! Message stream model types.
//!
//! A stream is a named, bounded, append-only log held by the daemon. Size-based
//! retention frees whole segments (`stream_segment_size`) from the oldest end,
//! either to make room for new data (`OverwriteOldestData`) or never, in which
//! case appends fail once the stream is full (`RejectNewData`). Time-based
//! retention (`time_to_live_millis`) is best effort and independent of it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum stream size (256 MiB).
pub const DEFAULT_MAX_SIZE: i64 = 256 * 1024 * 1024;

/// Default segment size (16 MiB).
pub const DEFAULT_STREAM_SEGMENT_SIZE: i64 = 16 * 1024 * 1024;

/// What the daemon does when an append would exceed `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StrategyOnFull {
    /// Fail the append and keep existing data.
    RejectNewData,
    /// Evict whole segments from the oldest end until the new message fits.
    OverwriteOldestData,
}

impl TryFrom<u8> for StrategyOnFull {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StrategyOnFull::RejectNewData),
            1 => Ok(StrategyOnFull::OverwriteOldestData),
            other => Err(format!("invalid strategy on full: {}", other)),
        }
    }
}

impl From<StrategyOnFull> for u8 {
    fn from(value: StrategyOnFull) -> Self {
        match value {
            StrategyOnFull::RejectNewData => 0,
            StrategyOnFull::OverwriteOldestData => 1,
        }
    }
}

/// Where the daemon keeps a stream's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Persistence {
    #[default]
    File,
    Memory,
}

impl TryFrom<u8> for Persistence {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Persistence::File),
            1 => Ok(Persistence::Memory),
            other => Err(format!("invalid persistence: {}", other)),
        }
    }
}

impl From<Persistence> for u8 {
    fn from(value: Persistence) -> Self {
        match value {
            Persistence::File => 0,
            Persistence::Memory => 1,
        }
    }
}

/// HTTP export sink.
///
/// Unstable: the daemon gives no guarantees around this destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub identifier: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_interval_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl HttpConfig {
    pub fn new(identifier: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            uri: uri.into(),
            batch_size: None,
            batch_interval_millis: None,
            priority: None,
        }
    }
}

/// IoT Analytics export sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoTAnalyticsConfig {
    pub identifier: String,
    pub iot_channel: String,
    /// Prefix for generated message ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_msg_id_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_interval_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl IoTAnalyticsConfig {
    pub fn new(identifier: impl Into<String>, iot_channel: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            iot_channel: iot_channel.into(),
            iot_msg_id_prefix: None,
            batch_size: None,
            batch_interval_millis: None,
            priority: None,
        }
    }
}

/// Kinesis data stream export sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisConfig {
    pub identifier: String,
    pub kinesis_stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_interval_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl KinesisConfig {
    pub fn new(identifier: impl Into<String>, kinesis_stream_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kinesis_stream_name: kinesis_stream_name.into(),
            batch_size: None,
            batch_interval_millis: None,
            priority: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_batch_interval_millis(mut self, millis: i64) -> Self {
        self.batch_interval_millis = Some(millis);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Export sinks attached to a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDefinition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iot_analytics: Vec<IoTAnalyticsConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinesis: Vec<KinesisConfig>,
}

impl ExportDefinition {
    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.iot_analytics.is_empty() && self.kinesis.is_empty()
    }

    /// Identifiers of every configured sink.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.http
            .iter()
            .map(|c| c.identifier.as_str())
            .chain(self.iot_analytics.iter().map(|c| c.identifier.as_str()))
            .chain(self.kinesis.iter().map(|c| c.identifier.as_str()))
    }
}

/// Definition of a message stream, sent with CreateMessageStream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStreamDefinition {
    /// Unique stream name.
    pub name: String,
    /// Maximum stream size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: i64,
    /// Size of one eviction unit in bytes.
    #[serde(default = "default_stream_segment_size")]
    pub stream_segment_size: i64,
    /// Best-effort expiry of messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live_millis: Option<i64>,
    pub strategy_on_full: StrategyOnFull,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<Persistence>,
    /// Only meaningful with file persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_on_write: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_definition: Option<ExportDefinition>,
}

fn default_max_size() -> i64 {
    DEFAULT_MAX_SIZE
}

fn default_stream_segment_size() -> i64 {
    DEFAULT_STREAM_SEGMENT_SIZE
}

impl MessageStreamDefinition {
    pub fn new(name: impl Into<String>, strategy_on_full: StrategyOnFull) -> Self {
        Self {
            name: name.into(),
            max_size: DEFAULT_MAX_SIZE,
            stream_segment_size: DEFAULT_STREAM_SEGMENT_SIZE,
            time_to_live_millis: None,
            strategy_on_full,
            persistence: None,
            flush_on_write: None,
            export_definition: None,
        }
    }

    pub fn with_max_size(mut self, max_size: i64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_stream_segment_size(mut self, size: i64) -> Self {
        self.stream_segment_size = size;
        self
    }

    pub fn with_time_to_live_millis(mut self, millis: i64) -> Self {
        self.time_to_live_millis = Some(millis);
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = Some(flush);
        self
    }

    pub fn with_export_definition(mut self, export: ExportDefinition) -> Self {
        self.export_definition = Some(export);
        self
    }

    /// Effective persistence mode.
    pub fn persistence(&self) -> Persistence {
        self.persistence.unwrap_or_default()
    }
}

/// A message read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub stream_name: String,
    /// Assigned by the daemon; the only ordering key within a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_time: Option<i64>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Ingest time as a UTC timestamp.
    pub fn ingest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ingest_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Options for ReadMessages. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagesOptions {
    /// Clamped up to the oldest retained sequence number by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_start_sequence_number: Option<i64>,
    #[serde(default = "default_min_message_count")]
    pub min_message_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_count: Option<i64>,
    /// 0 returns immediately; otherwise the daemon waits up to this long for
    /// `min_message_count` messages.
    #[serde(default)]
    pub read_timeout_millis: i64,
}

fn default_min_message_count() -> i64 {
    1
}

impl Default for ReadMessagesOptions {
    fn default() -> Self {
        Self {
            desired_start_sequence_number: None,
            min_message_count: 1,
            max_message_count: None,
            read_timeout_millis: 0,
        }
    }
}

impl ReadMessagesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(mut self, sequence_number: i64) -> Self {
        self.desired_start_sequence_number = Some(sequence_number);
        self
    }

    pub fn with_min_message_count(mut self, count: i64) -> Self {
        self.min_message_count = count;
        self
    }

    pub fn with_max_message_count(mut self, count: i64) -> Self {
        self.max_message_count = Some(count);
        self
    }

    pub fn with_read_timeout_millis(mut self, millis: i64) -> Self {
        self.read_timeout_millis = millis;
        self
    }
}

/// Storage status of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_sequence_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_sequence_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<i64>,
}

/// Progress of one export sink.
///
/// `last_exported_sequence_number` never decreases for a given sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_config_identifier: Option<String>,
    pub last_exported_sequence_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_export_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Definition plus runtime status, returned by DescribeMessageStream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStreamInfo {
    pub definition: MessageStreamDefinition,
    pub storage_status: StorageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_statuses: Vec<ExportStatus>,
}

impl MessageStreamInfo {
    /// Number of messages currently retained, if the stream is not empty.
    pub fn retained_messages(&self) -> Option<i64> {
        match (
            self.storage_status.oldest_sequence_number,
            self.storage_status.newest_sequence_number,
        ) {
            (Some(oldest), Some(newest)) if newest >= oldest => Some(newest - oldest + 1),
            _ => None,
        }
    }

    /// Export status for the sink with the given identifier.
    pub fn export_status(&self, identifier: &str) -> Option<&ExportStatus> {
        self.export_statuses
            .iter()
            .find(|s| s.export_config_identifier.as_deref() == Some(identifier))
    }
}
