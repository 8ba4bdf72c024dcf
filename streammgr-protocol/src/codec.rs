//! Encoder and decoder for frames and payloads, plus async stream helpers.

use crate::error::ProtocolError;
use crate::frame::{check_packet_size_within, Frame, LENGTH_PREFIX_SIZE};
use crate::message::{to_cbor, Request, RequestPayload, Response};
use crate::MAX_PACKET_SIZE;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Validates, serializes and frames a request.
    ///
    /// Nothing is produced unless the request passes validation and fits in
    /// a single frame.
    pub fn encode_request<R: RequestPayload>(request: &R) -> Result<BytesMut, ProtocolError> {
        Self::encode_request_within(request, MAX_PACKET_SIZE)
    }

    /// Like [`Encoder::encode_request`], with frames capped at
    /// `max_packet_size` bytes after the length prefix.
    ///
    /// A message body that alone exceeds the cap is rejected before the
    /// request is serialized.
    pub fn encode_request_within<R: RequestPayload>(
        request: &R,
        max_packet_size: usize,
    ) -> Result<BytesMut, ProtocolError> {
        let max_packet_size = max_packet_size.min(MAX_PACKET_SIZE);
        request.validate()?;
        check_packet_size_within(request.body_len(), max_packet_size)?;

        let payload = to_cbor(request)?;
        check_packet_size_within(payload.len(), max_packet_size)?;
        Frame::new(R::OPERATION, payload).encode()
    }

    /// Serializes and frames a response.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        response.to_frame()?.encode()
    }
}

/// Decodes frames into requests and responses.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Request::from_frame(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Response::from_frame(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads exactly one frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary and
/// [`ProtocolError::Truncated`] when it closed mid-frame. A frame with an
/// unknown operation byte is read in full before the error is returned.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut read = 0;
    while read < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[read..]).await?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                read,
            });
        }
        read += n;
    }

    let length = Frame::parse_length(prefix)?;

    // Grow with the data actually received rather than trusting the prefix.
    let mut body = BytesMut::with_capacity(length.min(64 * 1024));
    while body.len() < length {
        let remaining = (length - body.len()) as u64;
        let n = (&mut *reader).take(remaining).read_buf(&mut body).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: length,
                read: body.len(),
            });
        }
    }

    Frame::from_body(body.freeze()).map(Some)
}

/// Writes one frame to `writer` and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
