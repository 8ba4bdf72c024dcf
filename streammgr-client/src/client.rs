//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, ServerInfo};
use crate::error::ClientError;
use std::sync::Arc;
use std::time::Duration;
use streammgr_protocol::message::*;
use streammgr_protocol::validation::Constraint;
use streammgr_protocol::{
    Message, MessageStreamDefinition, MessageStreamInfo, ReadMessagesOptions, Response,
    ValidationError,
};

/// High-level client for the stream manager daemon.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Creates a client from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.to_connection_config())
    }

    /// Creates a client and connects it.
    pub async fn connect_with(config: ConnectionConfig) -> Result<Self, ClientError> {
        let client = Self::new(config);
        client.connect().await?;
        Ok(client)
    }

    /// Connects to the daemon and performs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Drops the current connection, failing its pending calls, and connects
    /// again.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.conn.close().await?;
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Handshake result of the current connection.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.conn.server_info()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn request<R>(&self, request: R) -> Result<R::Response, ClientError>
    where
        R: RequestPayload,
    {
        let response = self.conn.call(request).await?;
        extract::<R>(response)
    }

    // =========================================================================
    // Stream operations
    // =========================================================================

    /// Creates a message stream. Fails with `InvalidRequest` if a stream with
    /// the same name exists.
    pub async fn create_message_stream(
        &self,
        definition: MessageStreamDefinition,
    ) -> Result<(), ClientError> {
        self.request(CreateMessageStreamRequest::new(definition))
            .await?;
        Ok(())
    }

    /// Deletes a message stream and its data. Fails with `ResourceNotFound`
    /// if the stream does not exist.
    pub async fn delete_message_stream(&self, name: &str) -> Result<(), ClientError> {
        self.request(DeleteMessageStreamRequest::new(name)).await?;
        Ok(())
    }

    /// Returns a stream's definition, storage status and export progress.
    pub async fn describe_message_stream(
        &self,
        name: &str,
    ) -> Result<MessageStreamInfo, ClientError> {
        let response = self
            .request(DescribeMessageStreamRequest::new(name))
            .await?;
        response.message_stream_info.ok_or_else(|| {
            ClientError::UnexpectedResponse("describe response without stream info".to_string())
        })
    }

    /// Appends one message and returns its sequence number.
    pub async fn append_message(
        &self,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<i64, ClientError> {
        let response = self.request(AppendMessageRequest::new(name, data)).await?;
        response.sequence_number.ok_or_else(|| {
            ClientError::UnexpectedResponse("append response without sequence number".to_string())
        })
    }

    /// Reads messages from a stream.
    ///
    /// With a non-zero `read_timeout_millis` the daemon waits up to that long
    /// for `min_message_count` messages and fails with `NotEnoughMessages`
    /// otherwise; the local deadline is extended by the same amount.
    pub async fn read_messages(
        &self,
        name: &str,
        options: Option<ReadMessagesOptions>,
    ) -> Result<Vec<Message>, ClientError> {
        let request_timeout = self.conn.config().request_timeout;
        let request = ReadMessagesRequest::new(name, options);

        let read_timeout = request.read_timeout_millis();
        let limit = i64::try_from(request_timeout.as_millis()).unwrap_or(i64::MAX);
        if read_timeout > limit {
            return Err(ValidationError::new(
                "ReadMessagesOptions",
                "read_messages_options.read_timeout_millis",
                Constraint::Maximum {
                    max: limit,
                    actual: read_timeout,
                },
            )
            .into());
        }

        let deadline = request_timeout + Duration::from_millis(read_timeout.max(0) as u64);
        let response = self.conn.call_with_timeout(request, deadline).await?;
        Ok(extract::<ReadMessagesRequest>(response)?.messages)
    }

    /// Lists the names of all streams.
    pub async fn list_streams(&self) -> Result<Vec<String>, ClientError> {
        let response = self.request(ListStreamsRequest::new()).await?;
        Ok(response.streams)
    }
}

/// Turns a non-success status into a typed error and unwraps the response
/// payload expected for `R`.
fn extract<R: RequestPayload>(response: Response) -> Result<R::Response, ClientError> {
    let status = response.status();
    if !status.is_success() {
        tracing::debug!(
            request_id = %response.request_id(),
            status = %status,
            "request failed"
        );
        return Err(ClientError::status(
            status,
            response.error_message(),
            response.request_id(),
        ));
    }

    R::Response::try_from(response).map_err(|other| {
        ClientError::UnexpectedResponse(format!(
            "{:?} in reply to {:?}",
            other.operation(),
            R::OPERATION
        ))
    })
}
