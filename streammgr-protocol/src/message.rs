//! Request and response payload types.
//!
//! Every payload is a CBOR map with camelCase keys. Requests carry a
//! client-generated `requestId`; responses echo it back together with a
//! status code and an optional error message.

use crate::error::{ProtocolError, StatusCode};
use crate::frame::{Frame, Operation};
use crate::model::{Message, MessageStreamDefinition, MessageStreamInfo, ReadMessagesOptions};
use crate::validation::{Rule, Validate, ValidationError, Validator, NAME_RULES, REQUEST_ID_RULES};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a fresh request id.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// A typed request payload and the response payload it expects.
pub trait RequestPayload: Serialize + Validate + Into<Request> {
    const OPERATION: Operation;

    type Response: TryFrom<Response, Error = Response>;

    fn request_id(&self) -> &str;

    /// Length of the opaque message body carried by this request, checked
    /// against the frame limit before the request is serialized.
    fn body_len(&self) -> usize {
        0
    }
}

/// Handshake sent immediately after the transport is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub request_id: String,
    pub protocol_version: String,
    pub sdk_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl ConnectRequest {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            request_id: new_request_id(),
            protocol_version: crate::PROTOCOL_VERSION.to_string(),
            sdk_version: crate::SDK_VERSION.to_string(),
            auth_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_protocol_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageStreamRequest {
    pub request_id: String,
    pub definition: MessageStreamDefinition,
}

impl CreateMessageStreamRequest {
    pub fn new(definition: MessageStreamDefinition) -> Self {
        Self {
            request_id: new_request_id(),
            definition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageStreamResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageStreamRequest {
    pub request_id: String,
    pub name: String,
}

impl DeleteMessageStreamRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageStreamResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeMessageStreamRequest {
    pub request_id: String,
    pub name: String,
}

impl DescribeMessageStreamRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeMessageStreamResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_stream_info: Option<MessageStreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    pub request_id: String,
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl AppendMessageRequest {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id: new_request_id(),
            name: name.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagesRequest {
    pub request_id: String,
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_messages_options: Option<ReadMessagesOptions>,
}

impl ReadMessagesRequest {
    pub fn new(stream_name: impl Into<String>, options: Option<ReadMessagesOptions>) -> Self {
        Self {
            request_id: new_request_id(),
            stream_name: stream_name.into(),
            read_messages_options: options,
        }
    }

    /// Server-side wait requested by the options, in milliseconds.
    pub fn read_timeout_millis(&self) -> i64 {
        self.read_messages_options
            .as_ref()
            .map(|o| o.read_timeout_millis)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagesResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStreamsRequest {
    pub request_id: String,
}

impl ListStreamsRequest {
    pub fn new() -> Self {
        Self {
            request_id: new_request_id(),
        }
    }
}

impl Default for ListStreamsRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStreamsResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub streams: Vec<String>,
}

/// Generic error reply, sent with operation `Unknown` when the server
/// cannot answer with the paired response type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Any request, tagged by its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(ConnectRequest),
    CreateMessageStream(CreateMessageStreamRequest),
    DeleteMessageStream(DeleteMessageStreamRequest),
    DescribeMessageStream(DescribeMessageStreamRequest),
    AppendMessage(AppendMessageRequest),
    ReadMessages(ReadMessagesRequest),
    ListStreams(ListStreamsRequest),
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Connect(_) => Operation::Connect,
            Request::CreateMessageStream(_) => Operation::CreateMessageStream,
            Request::DeleteMessageStream(_) => Operation::DeleteMessageStream,
            Request::DescribeMessageStream(_) => Operation::DescribeMessageStream,
            Request::AppendMessage(_) => Operation::AppendMessage,
            Request::ReadMessages(_) => Operation::ReadMessages,
            Request::ListStreams(_) => Operation::ListStreams,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Request::Connect(r) => &r.request_id,
            Request::CreateMessageStream(r) => &r.request_id,
            Request::DeleteMessageStream(r) => &r.request_id,
            Request::DescribeMessageStream(r) => &r.request_id,
            Request::AppendMessage(r) => &r.request_id,
            Request::ReadMessages(r) => &r.request_id,
            Request::ListStreams(r) => &r.request_id,
        }
    }

    /// Serializes the payload into a frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let payload = match self {
            Request::Connect(r) => to_cbor(r)?,
            Request::CreateMessageStream(r) => to_cbor(r)?,
            Request::DeleteMessageStream(r) => to_cbor(r)?,
            Request::DescribeMessageStream(r) => to_cbor(r)?,
            Request::AppendMessage(r) => to_cbor(r)?,
            Request::ReadMessages(r) => to_cbor(r)?,
            Request::ListStreams(r) => to_cbor(r)?,
        };
        Ok(Frame::new(self.operation(), payload))
    }

    /// Parses a request frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let payload = &frame.payload[..];
        Ok(match frame.operation {
            Operation::Connect => Request::Connect(from_cbor(payload)?),
            Operation::CreateMessageStream => Request::CreateMessageStream(from_cbor(payload)?),
            Operation::DeleteMessageStream => Request::DeleteMessageStream(from_cbor(payload)?),
            Operation::DescribeMessageStream => {
                Request::DescribeMessageStream(from_cbor(payload)?)
            }
            Operation::AppendMessage => Request::AppendMessage(from_cbor(payload)?),
            Operation::ReadMessages => Request::ReadMessages(from_cbor(payload)?),
            Operation::ListStreams => Request::ListStreams(from_cbor(payload)?),
            other => {
                return Err(ProtocolError::Decode(format!(
                    "{:?} is not a request operation",
                    other
                )))
            }
        })
    }
}

/// Any response, tagged by its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Connect(ConnectResponse),
    CreateMessageStream(CreateMessageStreamResponse),
    DeleteMessageStream(DeleteMessageStreamResponse),
    DescribeMessageStream(DescribeMessageStreamResponse),
    AppendMessage(AppendMessageResponse),
    ReadMessages(ReadMessagesResponse),
    ListStreams(ListStreamsResponse),
    Error(ErrorResponse),
}

macro_rules! response_fields {
    ($self:ident, $r:ident => $expr:expr) => {
        match $self {
            Response::Connect($r) => $expr,
            Response::CreateMessageStream($r) => $expr,
            Response::DeleteMessageStream($r) => $expr,
            Response::DescribeMessageStream($r) => $expr,
            Response::AppendMessage($r) => $expr,
            Response::ReadMessages($r) => $expr,
            Response::ListStreams($r) => $expr,
            Response::Error($r) => $expr,
        }
    };
}

impl Response {
    pub fn operation(&self) -> Operation {
        match self {
            Response::Connect(_) => Operation::ConnectResponse,
            Response::CreateMessageStream(_) => Operation::CreateMessageStreamResponse,
            Response::DeleteMessageStream(_) => Operation::DeleteMessageStreamResponse,
            Response::DescribeMessageStream(_) => Operation::DescribeMessageStreamResponse,
            Response::AppendMessage(_) => Operation::AppendMessageResponse,
            Response::ReadMessages(_) => Operation::ReadMessagesResponse,
            Response::ListStreams(_) => Operation::ListStreamsResponse,
            Response::Error(_) => Operation::Unknown,
        }
    }

    pub fn request_id(&self) -> &str {
        response_fields!(self, r => &r.request_id)
    }

    pub fn status(&self) -> StatusCode {
        response_fields!(self, r => r.status)
    }

    pub fn error_message(&self) -> Option<&str> {
        response_fields!(self, r => r.error_message.as_deref())
    }

    /// Serializes the payload into a frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let payload = response_fields!(self, r => to_cbor(r)?);
        Ok(Frame::new(self.operation(), payload))
    }

    /// Parses a response frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let payload = &frame.payload[..];
        Ok(match frame.operation {
            Operation::ConnectResponse => Response::Connect(from_cbor(payload)?),
            Operation::CreateMessageStreamResponse => {
                Response::CreateMessageStream(from_cbor(payload)?)
            }
            Operation::DeleteMessageStreamResponse => {
                Response::DeleteMessageStream(from_cbor(payload)?)
            }
            Operation::DescribeMessageStreamResponse => {
                Response::DescribeMessageStream(from_cbor(payload)?)
            }
            Operation::AppendMessageResponse => Response::AppendMessage(from_cbor(payload)?),
            Operation::ReadMessagesResponse => Response::ReadMessages(from_cbor(payload)?),
            Operation::ListStreamsResponse => Response::ListStreams(from_cbor(payload)?),
            Operation::Unknown => Response::Error(from_cbor(payload)?),
            other => {
                return Err(ProtocolError::Decode(format!(
                    "{:?} is not a response operation",
                    other
                )))
            }
        })
    }

    /// Builds a generic error reply for a request the server could not handle.
    pub fn error(
        request_id: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Response::Error(ErrorResponse {
            request_id: request_id.into(),
            status,
            error_message: Some(message.into()),
        })
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(ciborium::de::from_reader(payload)?)
}

macro_rules! request_payload {
    ($req:ident, $resp:ident, $variant:ident $(, body = $body:ident)?) => {
        impl RequestPayload for $req {
            const OPERATION: Operation = Operation::$variant;

            type Response = $resp;

            fn request_id(&self) -> &str {
                &self.request_id
            }

            $(
                fn body_len(&self) -> usize {
                    self.$body.len()
                }
            )?
        }

        impl From<$req> for Request {
            fn from(req: $req) -> Self {
                Request::$variant(req)
            }
        }

        impl From<$resp> for Response {
            fn from(resp: $resp) -> Self {
                Response::$variant(resp)
            }
        }

        impl TryFrom<Response> for $resp {
            type Error = Response;

            fn try_from(response: Response) -> Result<Self, Self::Error> {
                match response {
                    Response::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

request_payload!(ConnectRequest, ConnectResponse, Connect);
request_payload!(CreateMessageStreamRequest, CreateMessageStreamResponse, CreateMessageStream);
request_payload!(DeleteMessageStreamRequest, DeleteMessageStreamResponse, DeleteMessageStream);
request_payload!(
    DescribeMessageStreamRequest,
    DescribeMessageStreamResponse,
    DescribeMessageStream
);
request_payload!(AppendMessageRequest, AppendMessageResponse, AppendMessage, body = payload);
request_payload!(ReadMessagesRequest, ReadMessagesResponse, ReadMessages);
request_payload!(ListStreamsRequest, ListStreamsResponse, ListStreams);

impl Validate for ConnectRequest {
    const OBJECT: &'static str = "ConnectRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.string("protocol_version", Some(&self.protocol_version), &[Rule::Required])?;
        v.string("sdk_version", Some(&self.sdk_version), &[Rule::Required])
    }
}

impl Validate for CreateMessageStreamRequest {
    const OBJECT: &'static str = "CreateMessageStreamRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.nested("definition", Some(&self.definition), &[Rule::Required])
    }
}

impl Validate for DeleteMessageStreamRequest {
    const OBJECT: &'static str = "DeleteMessageStreamRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.string("name", Some(&self.name), NAME_RULES)
    }
}

impl Validate for DescribeMessageStreamRequest {
    const OBJECT: &'static str = "DescribeMessageStreamRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.string("name", Some(&self.name), NAME_RULES)
    }
}

impl Validate for AppendMessageRequest {
    const OBJECT: &'static str = "AppendMessageRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.string("name", Some(&self.name), NAME_RULES)?;
        v.bytes("payload", Some(&self.payload), &[Rule::Required, Rule::MinLength(1)])
    }
}

impl Validate for ReadMessagesRequest {
    const OBJECT: &'static str = "ReadMessagesRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)?;
        v.string("stream_name", Some(&self.stream_name), NAME_RULES)?;
        v.nested("read_messages_options", self.read_messages_options.as_ref(), &[])
    }
}

impl Validate for ListStreamsRequest {
    const OBJECT: &'static str = "ListStreamsRequest";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("request_id", Some(&self.request_id), REQUEST_ID_RULES)
    }
}
