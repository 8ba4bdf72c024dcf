//! Binary frame format.
//!
//! Frame layout (4 bytes length prefix + 1 byte operation + payload):
//!
//! ```text
//! +-----------------------+-----------+---------------------+
//! | length (i32, BE)      | operation | payload             |
//! | 4 bytes               | 1 byte    | length - 1 bytes    |
//! +-----------------------+-----------+---------------------+
//! ```
//!
//! `length` counts the operation byte plus the payload.

use crate::error::ProtocolError;
use crate::MAX_PACKET_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Operation discriminator carried in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Unknown,
    Connect,
    CreateMessageStream,
    DeleteMessageStream,
    AppendMessage,
    ReadMessages,
    ConnectResponse,
    CreateMessageStreamResponse,
    DeleteMessageStreamResponse,
    AppendMessageResponse,
    ReadMessagesResponse,
    ListStreams,
    ListStreamsResponse,
    DescribeMessageStream,
    DescribeMessageStreamResponse,
}

impl Operation {
    /// Returns the wire byte for this operation.
    pub fn as_u8(&self) -> u8 {
        match self {
            Operation::Unknown => 0,
            Operation::Connect => 1,
            Operation::CreateMessageStream => 2,
            Operation::DeleteMessageStream => 3,
            Operation::AppendMessage => 4,
            Operation::ReadMessages => 5,
            Operation::ConnectResponse => 6,
            Operation::CreateMessageStreamResponse => 7,
            Operation::DeleteMessageStreamResponse => 8,
            Operation::AppendMessageResponse => 9,
            Operation::ReadMessagesResponse => 10,
            Operation::ListStreams => 11,
            Operation::ListStreamsResponse => 12,
            Operation::DescribeMessageStream => 13,
            Operation::DescribeMessageStreamResponse => 14,
        }
    }

    /// Returns the response operation paired with a request operation.
    pub fn response(&self) -> Option<Operation> {
        match self {
            Operation::Connect => Some(Operation::ConnectResponse),
            Operation::CreateMessageStream => Some(Operation::CreateMessageStreamResponse),
            Operation::DeleteMessageStream => Some(Operation::DeleteMessageStreamResponse),
            Operation::AppendMessage => Some(Operation::AppendMessageResponse),
            Operation::ReadMessages => Some(Operation::ReadMessagesResponse),
            Operation::ListStreams => Some(Operation::ListStreamsResponse),
            Operation::DescribeMessageStream => Some(Operation::DescribeMessageStreamResponse),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Operation::ConnectResponse
                | Operation::CreateMessageStreamResponse
                | Operation::DeleteMessageStreamResponse
                | Operation::AppendMessageResponse
                | Operation::ReadMessagesResponse
                | Operation::ListStreamsResponse
                | Operation::DescribeMessageStreamResponse
        )
    }
}

impl TryFrom<u8> for Operation {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Operation::Unknown,
            1 => Operation::Connect,
            2 => Operation::CreateMessageStream,
            3 => Operation::DeleteMessageStream,
            4 => Operation::AppendMessage,
            5 => Operation::ReadMessages,
            6 => Operation::ConnectResponse,
            7 => Operation::CreateMessageStreamResponse,
            8 => Operation::DeleteMessageStreamResponse,
            9 => Operation::AppendMessageResponse,
            10 => Operation::ReadMessagesResponse,
            11 => Operation::ListStreams,
            12 => Operation::ListStreamsResponse,
            13 => Operation::DescribeMessageStream,
            14 => Operation::DescribeMessageStreamResponse,
            other => return Err(ProtocolError::UnknownOperation(other)),
        })
    }
}

/// Checks that a payload of `payload_len` bytes fits in one frame.
pub fn check_packet_size(payload_len: usize) -> Result<(), ProtocolError> {
    check_packet_size_within(payload_len, MAX_PACKET_SIZE)
}

/// Checks that a payload of `payload_len` bytes fits in a frame no larger
/// than `max` (operation byte included).
pub fn check_packet_size_within(payload_len: usize, max: usize) -> Result<(), ProtocolError> {
    let size = payload_len.saturating_add(1);
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// A single length-prefixed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Operation this frame carries.
    pub operation: Operation,
    /// Frame payload (CBOR data).
    pub payload: Bytes,
}

impl Frame {
    pub fn new(operation: Operation, payload: impl Into<Bytes>) -> Self {
        Self {
            operation,
            payload: payload.into(),
        }
    }

    /// Value of the length prefix for this frame.
    pub fn wire_length(&self) -> usize {
        self.payload.len() + 1
    }

    /// Encodes the frame into bytes.
    ///
    /// Fails before producing any output if the frame would exceed
    /// [`MAX_PACKET_SIZE`].
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        check_packet_size(self.payload.len())?;

        let length = self.wire_length();
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + length);

        // Length (4 bytes, signed big-endian)
        buf.put_i32(length as i32);

        // Operation (1 byte)
        buf.put_u8(self.operation.as_u8());

        // Payload
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Parses a length prefix, returning the number of bytes that follow it.
    pub fn parse_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, ProtocolError> {
        let length = i32::from_be_bytes(prefix);
        if length <= 0 {
            return Err(ProtocolError::InvalidLength(length));
        }
        let length = length as usize;
        if length > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(length)
    }

    /// Builds a frame from the `length` bytes that follow a length prefix.
    pub fn from_body(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::InvalidLength(0));
        }
        let op_byte = body.get_u8();
        let operation = Operation::try_from(op_byte)?;
        Ok(Self {
            operation,
            payload: body,
        })
    }

    /// Decodes a frame from a buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// A frame with an unknown operation byte is consumed before the error
    /// is returned, so the buffer stays aligned on the next frame.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let prefix: [u8; LENGTH_PREFIX_SIZE] = [buf[0], buf[1], buf[2], buf[3]];
        let length = Self::parse_length(prefix)?;

        if buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(length).freeze();
        Self::from_body(body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(Operation::AppendMessage, &b"abc"[..]);
        let encoded = frame.encode().unwrap();

        assert_eq!(&encoded[..], &[0, 0, 0, 4, 4, b'a', b'b', b'c']);
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(Operation::ReadMessagesResponse, &b"payload bytes"[..]);

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(Operation::ListStreams, Bytes::new());
        let mut buf = frame.encode().unwrap();
        assert_eq!(buf.len(), 5);

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.operation, Operation::ListStreams);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let frame = Frame::new(Operation::Connect, &b"0123456789"[..]);
        let encoded = frame.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..3]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..8]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        // Nothing consumed while waiting for more data
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_invalid_length() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFE, 1][..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidLength(-2))));

        let mut buf = BytesMut::from(&[0, 0, 0, 0][..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidLength(0))));
    }

    #[test]
    fn test_declared_length_too_large() {
        let too_big = (MAX_PACKET_SIZE as i32 + 1).to_be_bytes();
        let mut buf = BytesMut::from(&too_big[..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_packet_size_limit() {
        assert!(check_packet_size(MAX_PACKET_SIZE - 1).is_ok());
        assert!(matches!(
            check_packet_size(MAX_PACKET_SIZE),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert!(check_packet_size(usize::MAX).is_err());
    }

    #[test]
    fn test_unknown_operation_is_consumed() {
        let mut buf = BytesMut::new();
        buf.put_i32(3);
        buf.put_u8(200);
        buf.put_slice(b"xy");
        buf.extend_from_slice(&Frame::new(Operation::ListStreamsResponse, &b"ok"[..]).encode().unwrap());

        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::UnknownOperation(200))));

        let next = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.operation, Operation::ListStreamsResponse);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let frame1 = Frame::new(Operation::AppendMessageResponse, &b"1"[..]);
        let frame2 = Frame::new(Operation::ReadMessagesResponse, &b"2"[..]);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame1.encode().unwrap());
        buf.extend_from_slice(&frame2.encode().unwrap());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), frame2);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_operation_pairs() {
        assert_eq!(
            Operation::AppendMessage.response(),
            Some(Operation::AppendMessageResponse)
        );
        assert_eq!(
            Operation::DescribeMessageStream.response(),
            Some(Operation::DescribeMessageStreamResponse)
        );
        assert_eq!(Operation::ReadMessagesResponse.response(), None);
        assert!(Operation::ListStreamsResponse.is_response());
        assert!(!Operation::ListStreams.is_response());
    }

    fn any_operation() -> impl Strategy<Value = Operation> {
        (0u8..=14).prop_map(|b| Operation::try_from(b).unwrap())
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(
            op in any_operation(),
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let frame = Frame::new(op, payload);
            let mut buf = frame.encode().unwrap();
            prop_assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + frame.wire_length());

            let decoded = Frame::decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(decoded, frame);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_operation_byte_roundtrip(byte in 0u8..=14) {
            let op = Operation::try_from(byte).unwrap();
            prop_assert_eq!(op.as_u8(), byte);
        }
    }
}
