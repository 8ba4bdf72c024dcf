//! Connection management and response correlation.
//!
//! A [`Connection`] owns one transport. After the Connect handshake the read
//! half is handed to a background reader task and the write half to a
//! writer task; they are the only users of the socket. Callers queue whole
//! encoded frames for the writer, so a call that is dropped or times out can
//! never leave half a frame on the wire. Each call registers a oneshot
//! sender in the pending table keyed by request id and waits on it with a
//! deadline that covers queueing, writing and the response.

use crate::error::ClientError;
use crate::stream::ClientStream;
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streammgr_protocol::message::{ConnectRequest, ConnectResponse, RequestPayload};
use streammgr_protocol::{
    read_frame, Encoder, Frame, Operation, ProtocolError, Response, StatusCode, DEFAULT_PORT,
    MAX_PACKET_SIZE, PROTOCOL_VERSION, SDK_VERSION,
};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default time allowed for establishing the transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time a call waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames queued for the writer task before callers wait for room.
const OUTBOUND_QUEUE: usize = 64;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::tcp("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses `host`, `host:port` or `unix:/path/to/socket`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("empty unix socket path".to_string());
            }
            return Ok(Endpoint::unix(path));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| format!("invalid port in endpoint '{}'", s))?;
                Ok(Endpoint::tcp(host, port))
            }
            None if !s.is_empty() => Ok(Endpoint::tcp(s, DEFAULT_PORT)),
            None => Err("empty endpoint".to_string()),
        }
    }
}

/// Connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Daemon address.
    pub endpoint: Endpoint,
    /// Time allowed for establishing the transport.
    pub connect_timeout: Duration,
    /// Time a call (and the handshake) waits for its response.
    pub request_timeout: Duration,
    /// Token sent in the Connect handshake.
    pub auth_token: Option<String>,
    /// Protocol version offered in the handshake.
    pub protocol_version: String,
    /// Client library version reported in the handshake.
    pub sdk_version: String,
    /// Largest frame, in bytes after the length prefix, this client sends.
    /// Capped at the protocol maximum.
    pub max_request_size: usize,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_token: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            max_request_size: MAX_PACKET_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size.min(MAX_PACKET_SIZE);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("protocol_version", &self.protocol_version)
            .field("sdk_version", &self.sdk_version)
            .field("max_request_size", &self.max_request_size)
            .finish()
    }
}

/// What the daemon reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub protocol_version: Option<String>,
    pub supported_protocol_versions: Vec<String>,
    pub server_version: Option<String>,
    pub client_identifier: Option<String>,
}

impl From<ConnectResponse> for ServerInfo {
    fn from(resp: ConnectResponse) -> Self {
        Self {
            protocol_version: resp.protocol_version,
            supported_protocol_versions: resp.supported_protocol_versions,
            server_version: resp.server_version,
            client_identifier: resp.client_identifier,
        }
    }
}

/// A caller waiting for its response.
struct PendingCall {
    expected: Operation,
    tx: oneshot::Sender<Result<Response, ClientError>>,
}

/// State shared between callers and the connection's tasks.
struct Shared {
    /// Queue feeding the writer task; `None` while disconnected.
    outbound: SyncMutex<Option<mpsc::Sender<BytesFrame>>>,
    /// Pending calls keyed by request id.
    pending: DashMap<String, PendingCall>,
    connected: AtomicBool,
    /// Bumped on every connect and close; a task only tears down the
    /// connection it was started for.
    generation: AtomicU64,
    /// Reader and writer tasks of the current connection.
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

/// One encoded frame, length prefix included.
type BytesFrame = BytesMut;

impl Shared {
    /// Routes one frame to the caller waiting for it.
    fn dispatch(&self, frame: Frame) {
        let response = match Response::from_frame(&frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(operation = ?frame.operation, error = %e, "discarding undecodable frame");
                return;
            }
        };

        let request_id = response.request_id().to_string();
        let Some((_, call)) = self.pending.remove(&request_id) else {
            tracing::warn!(
                request_id = %request_id,
                operation = ?response.operation(),
                "discarding response for unknown request id"
            );
            return;
        };

        let actual = response.operation();
        let result = if actual == call.expected || actual == Operation::Unknown {
            Ok(response)
        } else {
            Err(ClientError::UnexpectedResponse(format!(
                "expected {:?}, got {:?}",
                call.expected, actual
            )))
        };

        tracing::debug!(request_id = %request_id, operation = ?actual, "dispatching response");
        if call.tx.send(result).is_err() {
            tracing::debug!(request_id = %request_id, "caller gone before response arrived");
        }
    }

    /// Fails every pending call.
    fn fail_pending(&self, err: impl Fn() -> ClientError) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.tx.send(Err(err()));
            }
        }
    }

    /// Stops both tasks of the current connection.
    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Tears down connection `generation` after a transport failure. Called
    /// from the reader or writer task; the caller returns right after.
    fn connection_lost(&self, generation: u64, reason: String) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut outbound = self.outbound.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                // Already closed or replaced by a newer connection
                return;
            }
            self.connected.store(false, Ordering::SeqCst);
            outbound.take();
            // Taken under the lock so a concurrent reconnect keeps its own tasks
            self.tasks.lock().drain(..).collect()
        };

        tracing::warn!(reason = %reason, pending = self.pending.len(), "connection lost");
        self.fail_pending(|| ClientError::ConnectionLost(reason.clone()));
        for task in tasks {
            task.abort();
        }
    }
}

/// Removes a pending entry however the call ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingCall>,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}

/// Reads frames until the transport fails, dispatching each response.
async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<ClientStream>, generation: u64) {
    tracing::debug!(generation, "reader loop started");
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => shared.dispatch(frame),
            Ok(None) => break "connection closed by server".to_string(),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "skipping frame");
            }
            Err(e) => break e.to_string(),
        }
    };
    shared.connection_lost(generation, reason);
}

/// Writes queued frames in order. A frame that cannot be written whole
/// within `write_timeout` leaves the stream unusable, so the connection is
/// torn down.
async fn write_loop(
    shared: Arc<Shared>,
    mut writer: WriteHalf<ClientStream>,
    mut queue: mpsc::Receiver<BytesFrame>,
    generation: u64,
    write_timeout: Duration,
) {
    tracing::debug!(generation, "writer loop started");
    let reason = loop {
        let Some(frame) = queue.recv().await else {
            // Closed by the client
            let _ = writer.shutdown().await;
            return;
        };

        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break e.to_string(),
            Err(_) => break format!("write of {} bytes timed out", frame.len()),
        }
    };
    shared.connection_lost(generation, reason);
}

/// A connection to the stream manager daemon.
pub struct Connection {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    server_info: RwLock<Option<ServerInfo>>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                outbound: SyncMutex::new(None),
                pending: DashMap::new(),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                tasks: SyncMutex::new(Vec::new()),
            }),
            server_info: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establishes the transport, performs the handshake and starts the
    /// reader and writer tasks. Does nothing if already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let endpoint = &self.config.endpoint;
        tracing::debug!(endpoint = %endpoint, "connecting");

        let stream = tokio::time::timeout(self.config.connect_timeout, ClientStream::connect(endpoint))
            .await
            .map_err(|_| {
                tracing::debug!(endpoint = %endpoint, "connect timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!(endpoint = %endpoint, error = %e, "connect failed");
                ClientError::Io(e)
            })?;

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let info = tokio::time::timeout(
            self.config.request_timeout,
            self.handshake(&mut read_half, &mut write_half),
        )
        .await
        .map_err(|_| {
            tracing::debug!("handshake timeout");
            ClientError::Timeout
        })??;

        let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE);
        {
            let mut outbound = self.shared.outbound.lock();
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.abort_tasks();
            self.shared.tasks.lock().extend([
                tokio::spawn(read_loop(self.shared.clone(), read_half, generation)),
                tokio::spawn(write_loop(
                    self.shared.clone(),
                    write_half,
                    queue_rx,
                    generation,
                    self.config.request_timeout,
                )),
            ]);
            *outbound = Some(queue_tx);
            self.shared.connected.store(true, Ordering::SeqCst);
        }

        tracing::info!(
            endpoint = %endpoint,
            server_version = info.server_version.as_deref().unwrap_or("unknown"),
            client_identifier = info.client_identifier.as_deref().unwrap_or(""),
            "connected"
        );
        *self.server_info.write() = Some(info);
        Ok(())
    }

    /// Sends Connect and reads the reply directly, before the tasks run.
    async fn handshake(
        &self,
        reader: &mut ReadHalf<ClientStream>,
        writer: &mut WriteHalf<ClientStream>,
    ) -> Result<ServerInfo, ClientError> {
        let request = ConnectRequest {
            protocol_version: self.config.protocol_version.clone(),
            sdk_version: self.config.sdk_version.clone(),
            ..ConnectRequest::new(self.config.auth_token.clone())
        };
        let encoded = Encoder::encode_request_within(&request, self.config.max_request_size)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        tracing::debug!(request_id = %request.request_id, "connect request sent");

        let frame = read_frame(reader)
            .await?
            .ok_or(ClientError::ConnectionClosed)?;

        if frame.operation != Operation::ConnectResponse && frame.operation != Operation::Unknown {
            let message = format!("expected ConnectResponse, got {:?}", frame.operation);
            return Err(ClientError::status(
                StatusCode::UnexpectedOperation,
                Some(&message),
                &request.request_id,
            ));
        }

        let response = Response::from_frame(&frame)?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "handshake rejected");
            return Err(ClientError::status(
                response.status(),
                response.error_message(),
                response.request_id(),
            ));
        }

        match response {
            Response::Connect(resp) => Ok(ServerInfo::from(resp)),
            other => Err(ClientError::UnexpectedResponse(format!(
                "{:?} in reply to Connect",
                other.operation()
            ))),
        }
    }

    /// Sends a request and waits for its response using the configured
    /// request timeout.
    pub async fn call<R>(&self, request: R) -> Result<Response, ClientError>
    where
        R: RequestPayload,
    {
        self.call_with_timeout(request, self.config.request_timeout)
            .await
    }

    /// Sends a request and waits up to `timeout` for its response.
    ///
    /// The deadline covers waiting for room in the outbound queue as well as
    /// the response. The pending entry is registered before the frame is
    /// queued, under the same lock a teardown takes, so a fast reply always
    /// finds its caller and a teardown always fails it. The entry is removed
    /// on every exit path, including when this future is dropped.
    pub async fn call_with_timeout<R>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<Response, ClientError>
    where
        R: RequestPayload,
    {
        let deadline = Instant::now() + timeout;
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let request_id = request.request_id().to_string();
        let encoded = Encoder::encode_request_within(&request, self.config.max_request_size)
            .map_err(|e| match e {
                ProtocolError::FrameTooLarge { size, max } => ClientError::status(
                    StatusCode::RequestPayloadTooLarge,
                    Some(&format!("request of {} bytes exceeds the {} byte limit", size, max)),
                    &request_id,
                ),
                other => ClientError::from(other),
            })?;
        drop(request);

        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            request_id: &request_id,
        };

        let queue = {
            let outbound = self.shared.outbound.lock();
            let queue = outbound.as_ref().ok_or(ClientError::NotConnected)?.clone();
            self.shared.pending.insert(
                request_id.clone(),
                PendingCall {
                    expected: R::OPERATION.response().unwrap_or(Operation::Unknown),
                    tx,
                },
            );
            queue
        };

        let bytes = encoded.len();
        let exchange = async {
            if queue.send(encoded).await.is_err() {
                // Writer gone; the teardown has already failed this call
                return rx.await.unwrap_or(Err(ClientError::ConnectionClosed));
            }
            tracing::debug!(
                request_id = %request_id,
                operation = ?R::OPERATION,
                bytes,
                "request queued"
            );
            rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(request_id = %request_id, "request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Handshake result of the current connection.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Returns the number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Closes the connection. Pending calls fail with
    /// [`ClientError::ConnectionClosed`]. Safe to call more than once.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (was_connected, tasks) = {
            let mut outbound = self.shared.outbound.lock();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            outbound.take();
            let tasks: Vec<JoinHandle<()>> = self.shared.tasks.lock().drain(..).collect();
            (self.shared.connected.swap(false, Ordering::SeqCst), tasks)
        };

        for task in tasks {
            task.abort();
        }
        self.shared.fail_pending(|| ClientError::ConnectionClosed);
        *self.server_info.write() = None;

        if was_connected {
            tracing::info!(endpoint = %self.config.endpoint, "connection closed");
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.endpoint, Endpoint::tcp("127.0.0.1", 8088));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(config.auth_token.is_none());
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_max_request_size_capped() {
        assert_eq!(ConnectionConfig::default().max_request_size, MAX_PACKET_SIZE);
        let config = ConnectionConfig::default().with_max_request_size(usize::MAX);
        assert_eq!(config.max_request_size, MAX_PACKET_SIZE);
        let config = ConnectionConfig::default().with_max_request_size(4096);
        assert_eq!(config.max_request_size, 4096);
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = ConnectionConfig::default().with_auth_token("secret-token");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            "localhost:9000".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("localhost", 9000)
        );
        assert_eq!(
            "localhost".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("localhost", DEFAULT_PORT)
        );
        assert_eq!(
            "unix:/tmp/sm.sock".parse::<Endpoint>().unwrap(),
            Endpoint::unix("/tmp/sm.sock")
        );
        assert!("host:port".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::default().to_string(), "127.0.0.1:8088");
        assert_eq!(Endpoint::unix("/tmp/sm.sock").to_string(), "unix:/tmp/sm.sock");
    }

    #[tokio::test]
    async fn test_call_requires_connection() {
        let conn = Connection::new(ConnectionConfig::default());
        let result = conn
            .call(streammgr_protocol::message::ListStreamsRequest::new())
            .await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = Connection::new(ConnectionConfig::default());
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_connected());
        assert!(conn.server_info().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = Connection::new(ConnectionConfig::new(Endpoint::tcp("127.0.0.1", port)));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert!(!conn.is_connected());
    }
}
