//! In-process daemon speaking the wire protocol, plus helpers for scripting
//! raw server behaviour.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use streammgr_client::{Client, ConnectionConfig, Endpoint};
use streammgr_protocol::message::*;
use streammgr_protocol::model::StorageStatus;
use streammgr_protocol::{
    read_frame, write_frame, Message, MessageStreamDefinition, MessageStreamInfo,
    ReadMessagesOptions, Request, Response, StatusCode, StrategyOnFull, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const SERVER_VERSION: &str = "fake-daemon-1.0";

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Default)]
struct Segment {
    messages: Vec<Message>,
    bytes: i64,
}

struct StreamState {
    definition: MessageStreamDefinition,
    segments: VecDeque<Segment>,
    next_sequence: i64,
    total_bytes: i64,
}

type Failure = (StatusCode, String);

impl StreamState {
    fn new(definition: MessageStreamDefinition) -> Self {
        Self {
            definition,
            segments: VecDeque::new(),
            next_sequence: 0,
            total_bytes: 0,
        }
    }

    fn messages(&self) -> impl Iterator<Item = &Message> {
        self.segments.iter().flat_map(|s| s.messages.iter())
    }

    fn oldest(&self) -> Option<i64> {
        self.messages().next().and_then(|m| m.sequence_number)
    }

    fn newest(&self) -> Option<i64> {
        self.segments
            .back()
            .and_then(|s| s.messages.last())
            .and_then(|m| m.sequence_number)
    }

    fn append(&mut self, payload: Vec<u8>) -> Result<i64, Failure> {
        let size = payload.len() as i64;
        if size > self.definition.max_size {
            return Err((
                StatusCode::InvalidRequest,
                "message is larger than the stream".to_string(),
            ));
        }

        while self.total_bytes + size > self.definition.max_size {
            match self.definition.strategy_on_full {
                StrategyOnFull::RejectNewData => {
                    return Err((
                        StatusCode::InvalidRequest,
                        format!("stream {} is full", self.definition.name),
                    ))
                }
                StrategyOnFull::OverwriteOldestData => match self.segments.pop_front() {
                    Some(segment) => self.total_bytes -= segment.bytes,
                    None => break,
                },
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let needs_segment = match self.segments.back() {
            Some(segment) => segment.bytes + size > self.definition.stream_segment_size,
            None => true,
        };
        if needs_segment {
            self.segments.push_back(Segment::default());
        }
        let segment = self.segments.back_mut().expect("segment was just ensured");
        segment.messages.push(Message {
            stream_name: self.definition.name.clone(),
            sequence_number: Some(sequence),
            ingest_time: Some(now_millis()),
            payload,
        });
        segment.bytes += size;
        self.total_bytes += size;
        Ok(sequence)
    }

    /// Messages satisfying `options`, or `None` if fewer than the minimum
    /// are available.
    fn read(&self, options: &ReadMessagesOptions) -> Option<Vec<Message>> {
        let oldest = self.oldest()?;
        let start = options
            .desired_start_sequence_number
            .unwrap_or(oldest)
            .max(oldest);
        let max = options.max_message_count.unwrap_or(i64::MAX) as usize;

        let available: Vec<Message> = self
            .messages()
            .filter(|m| m.sequence_number.unwrap_or(-1) >= start)
            .take(max)
            .cloned()
            .collect();

        (available.len() as i64 >= options.min_message_count).then_some(available)
    }

    fn info(&self) -> MessageStreamInfo {
        MessageStreamInfo {
            definition: self.definition.clone(),
            storage_status: StorageStatus {
                oldest_sequence_number: self.oldest(),
                newest_sequence_number: self.newest(),
                total_bytes: Some(self.total_bytes),
            },
            export_statuses: Vec::new(),
        }
    }
}

struct DaemonState {
    auth_token: Option<String>,
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    requests: AtomicUsize,
}

impl DaemonState {
    fn check_connect(&self, connect: &ConnectRequest) -> (StatusCode, Option<String>) {
        if connect.protocol_version != PROTOCOL_VERSION {
            return (
                StatusCode::UnsupportedProtocolVersion,
                Some(format!("unsupported version {}", connect.protocol_version)),
            );
        }
        if self.auth_token.is_some() && connect.auth_token != self.auth_token {
            return (StatusCode::Unauthorized, Some("invalid auth token".to_string()));
        }
        (StatusCode::Success, None)
    }

    async fn serve<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let Ok(Some(frame)) = read_frame(&mut reader).await else {
            return;
        };
        let Ok(Request::Connect(connect)) = Request::from_frame(&frame) else {
            return;
        };

        let (status, error_message) = self.check_connect(&connect);
        let reply: Response = ConnectResponse {
            request_id: connect.request_id.clone(),
            status,
            error_message,
            protocol_version: Some(PROTOCOL_VERSION.to_string()),
            supported_protocol_versions: vec![PROTOCOL_VERSION.to_string()],
            server_version: Some(SERVER_VERSION.to_string()),
            client_identifier: Some(format!("client-{}", &connect.request_id[..8])),
        }
        .into();
        let Ok(frame) = reply.to_frame() else { return };
        if write_frame(&mut writer, &frame).await.is_err() || !status.is_success() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
        let writer_task = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                let Ok(frame) = response.to_frame() else { continue };
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        while let Ok(Some(frame)) = read_frame(&mut reader).await {
            let Ok(request) = Request::from_frame(&frame) else {
                continue;
            };
            self.requests.fetch_add(1, Ordering::SeqCst);
            let daemon = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = daemon.handle(request).await;
                let _ = tx.send(response);
            });
        }

        drop(tx);
        let _ = writer_task.await;
    }

    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateMessageStream(req) => {
                let mut streams = self.streams.lock();
                let name = req.definition.name.clone();
                let (status, error_message) = if streams.contains_key(&name) {
                    (StatusCode::InvalidRequest, Some(format!("stream {} exists", name)))
                } else {
                    streams.insert(name, StreamState::new(req.definition));
                    (StatusCode::Success, None)
                };
                CreateMessageStreamResponse {
                    request_id: req.request_id,
                    status,
                    error_message,
                }
                .into()
            }
            Request::DeleteMessageStream(req) => {
                let removed = self.streams.lock().remove(&req.name).is_some();
                let (status, error_message) = if removed {
                    (StatusCode::Success, None)
                } else {
                    (StatusCode::ResourceNotFound, Some(format!("no stream {}", req.name)))
                };
                DeleteMessageStreamResponse {
                    request_id: req.request_id,
                    status,
                    error_message,
                }
                .into()
            }
            Request::DescribeMessageStream(req) => {
                let info = self.streams.lock().get(&req.name).map(StreamState::info);
                match info {
                    Some(info) => DescribeMessageStreamResponse {
                        request_id: req.request_id,
                        status: StatusCode::Success,
                        error_message: None,
                        message_stream_info: Some(info),
                    }
                    .into(),
                    None => Response::error(
                        req.request_id,
                        StatusCode::ResourceNotFound,
                        format!("no stream {}", req.name),
                    ),
                }
            }
            Request::AppendMessage(req) => {
                let result = match self.streams.lock().get_mut(&req.name) {
                    Some(stream) => stream.append(req.payload),
                    None => Err((StatusCode::ResourceNotFound, format!("no stream {}", req.name))),
                };
                match result {
                    Ok(sequence) => {
                        self.appended.notify_waiters();
                        AppendMessageResponse {
                            request_id: req.request_id,
                            status: StatusCode::Success,
                            error_message: None,
                            sequence_number: Some(sequence),
                        }
                        .into()
                    }
                    Err((status, message)) => AppendMessageResponse {
                        request_id: req.request_id,
                        status,
                        error_message: Some(message),
                        sequence_number: None,
                    }
                    .into(),
                }
            }
            Request::ReadMessages(req) => self.read_messages(req).await,
            Request::ListStreams(req) => {
                let mut streams: Vec<String> = self.streams.lock().keys().cloned().collect();
                streams.sort();
                ListStreamsResponse {
                    request_id: req.request_id,
                    status: StatusCode::Success,
                    error_message: None,
                    streams,
                }
                .into()
            }
            Request::Connect(req) => Response::error(
                req.request_id,
                StatusCode::UnexpectedOperation,
                "already connected",
            ),
        }
    }

    async fn read_messages(&self, req: ReadMessagesRequest) -> Response {
        let options = req.read_messages_options.clone().unwrap_or_default();
        let deadline = Instant::now() + Duration::from_millis(options.read_timeout_millis as u64);

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = match self.streams.lock().get(&req.stream_name) {
                Some(stream) => Ok(stream.read(&options)),
                None => Err(format!("no stream {}", req.stream_name)),
            };

            let (status, error_message, messages) = match outcome {
                Ok(Some(messages)) => (StatusCode::Success, None, messages),
                Ok(None) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_ok() {
                        continue;
                    }
                    (
                        StatusCode::NotEnoughMessages,
                        Some("not enough messages".to_string()),
                        Vec::new(),
                    )
                }
                Err(message) => (StatusCode::ResourceNotFound, Some(message), Vec::new()),
            };

            return ReadMessagesResponse {
                request_id: req.request_id,
                status,
                error_message,
                messages,
            }
            .into();
        }
    }
}

/// A running in-process daemon.
pub struct FakeDaemon {
    state: Arc<DaemonState>,
    endpoint: Endpoint,
    accept_task: JoinHandle<()>,
}

impl FakeDaemon {
    pub async fn start() -> Self {
        Self::start_with_token(None).await
    }

    pub async fn start_with_token(token: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Self::state(token);

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(accept_state.clone().serve(stream));
            }
        });

        Self {
            state,
            endpoint: Endpoint::tcp("127.0.0.1", port),
            accept_task,
        }
    }

    pub async fn start_unix(path: &Path) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let state = Self::state(None);

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(accept_state.clone().serve(stream));
            }
        });

        Self {
            state,
            endpoint: Endpoint::unix(path),
            accept_task,
        }
    }

    fn state(token: Option<&str>) -> Arc<DaemonState> {
        Arc::new(DaemonState {
            auth_token: token.map(str::to_string),
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.endpoint())
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(5))
    }

    /// A connected client.
    pub async fn client(&self) -> Client {
        Client::connect_with(self.config()).await.unwrap()
    }

    /// Number of post-handshake requests received.
    pub fn requests_seen(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// A listener for tests that script the server side by hand.
pub async fn scripted_listener() -> (TcpListener, ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ConnectionConfig::new(Endpoint::tcp("127.0.0.1", port))
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(5));
    (listener, config)
}

/// Accepts one connection and answers its Connect request successfully.
pub async fn accept_handshake(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let request = match read_request(&mut stream).await {
        Request::Connect(connect) => connect,
        other => panic!("expected Connect, got {:?}", other),
    };
    send_response(
        &mut stream,
        ConnectResponse {
            request_id: request.request_id,
            status: StatusCode::Success,
            error_message: None,
            protocol_version: Some(PROTOCOL_VERSION.to_string()),
            supported_protocol_versions: vec![PROTOCOL_VERSION.to_string()],
            server_version: Some(SERVER_VERSION.to_string()),
            client_identifier: Some("scripted".to_string()),
        }
        .into(),
    )
    .await;
    stream
}

pub async fn read_request(stream: &mut TcpStream) -> Request {
    let frame = read_frame(stream).await.unwrap().expect("client closed");
    Request::from_frame(&frame).unwrap()
}

pub async fn send_response(stream: &mut TcpStream, response: Response) {
    let frame = response.to_frame().unwrap();
    write_frame(stream, &frame).await.unwrap();
}

/// A ListStreams reply whose only stream name is the request id it answers.
pub fn echo_list_response(request_id: &str) -> Response {
    ListStreamsResponse {
        request_id: request_id.to_string(),
        status: StatusCode::Success,
        error_message: None,
        streams: vec![request_id.to_string()],
    }
    .into()
}

pub fn definition(name: &str, strategy: StrategyOnFull) -> MessageStreamDefinition {
    MessageStreamDefinition::new(name, strategy)
}
