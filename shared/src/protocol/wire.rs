//! Wire protocol implementation for agent-aggregator communication.
//!
//! Every message is a single frame with a fixed 6-byte header followed by
//! the payload:
//!
//! ```text
//! +---------+------+--------------+-------------+
//! | peer id | type | length (u32) |   payload   |
//! |  1 byte | 1 B  |  big-endian  |  length B   |
//! +---------+------+--------------+-------------+
//! ```
//!
//! The length is explicit, so payload bytes never need escaping and a reader
//! knows up front how much to pull off the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the peer id field
pub const PEER_ID_SIZE: usize = 1;

/// Size of the message type field
pub const TYPE_SIZE: usize = 1;

/// Size of the payload length field
pub const LENGTH_SIZE: usize = 4;

/// Total header size
pub const HEADER_SIZE: usize = PEER_ID_SIZE + TYPE_SIZE + LENGTH_SIZE;

/// Largest payload `read_message` will allocate for. A peer declaring more
/// than this is treated as a protocol violation rather than trusted.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Message type tag (byte 1 of the header)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Acknowledges the previous message
    Ack = 0x00,
    /// Carries a serialized batch of bets
    Bet = 0x01,
    /// End of transmission, no further batches follow
    Eot = 0x02,
    /// Winners query
    QueryWinners = 0x03,
    /// Winners response
    Winners = 0x04,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Ack),
            0x01 => Some(Self::Bet),
            0x02 => Some(Self::Eot),
            0x03 => Some(Self::QueryWinners),
            0x04 => Some(Self::Winners),
            _ => None,
        }
    }

    /// Short protocol name, as used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Bet => "BET",
            Self::Eot => "EOT",
            Self::QueryWinners => "QWIN",
            Self::Winners => "RWIN",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed after {read} of {expected} bytes")]
    Closed { read: usize, expected: usize },

    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("frame truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub peer_id: u8,
    pub kind: MessageType,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.peer_id;
        bytes[1] = self.kind as u8;
        bytes[2..HEADER_SIZE].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, WireError> {
        let mut buf = &bytes[..];
        let peer_id = buf.get_u8();
        let raw_kind = buf.get_u8();
        let kind = MessageType::from_u8(raw_kind).ok_or(WireError::UnknownType(raw_kind))?;
        let payload_len = buf.get_u32();
        Ok(Self {
            peer_id,
            kind,
            payload_len,
        })
    }
}

/// Wire message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub peer_id: u8,
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Message {
    /// Create a new message
    pub fn new(peer_id: u8, kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            peer_id,
            kind,
            payload: payload.into(),
        }
    }

    /// Create a message with no payload (ACK, EOT, QWIN)
    pub fn empty(peer_id: u8, kind: MessageType) -> Self {
        Self::new(peer_id, kind, Bytes::new())
    }

    /// Payload interpreted as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    fn header(&self) -> Result<FrameHeader, WireError> {
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| WireError::PayloadTooLarge {
                len: self.payload.len() as u64,
                max: u32::MAX as u64,
            })?;
        Ok(FrameHeader {
            peer_id: self.peer_id,
            kind: self.kind,
            payload_len,
        })
    }

    /// Serialize the message into a complete frame.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&header.encode());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode exactly one complete frame from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = FrameHeader::decode(&raw)?;

        let body = &bytes[HEADER_SIZE..];
        let len = header.payload_len as usize;
        if body.len() < len {
            return Err(WireError::Truncated {
                expected: HEADER_SIZE + len,
                actual: bytes.len(),
            });
        }
        if body.len() > len {
            return Err(WireError::TrailingBytes(body.len() - len));
        }

        Ok(Self {
            peer_id: header.peer_id,
            kind: header.kind,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

/// Write one message to the stream.
///
/// Partial writes are retried until the whole frame is out; on error the
/// stream should be considered unusable.
pub async fn write_message<W: AsyncWrite + Unpin>(
    w: &mut W,
    message: &Message,
) -> Result<(), WireError> {
    let frame = message.encode()?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one message from the stream, rejecting payloads above `MAX_PAYLOAD_LEN`.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, WireError> {
    read_message_with_limit(r, MAX_PAYLOAD_LEN).await
}

/// Read one message, rejecting declared payload lengths above `max_payload`
/// before allocating for them.
pub async fn read_message_with_limit<R: AsyncRead + Unpin>(
    r: &mut R,
    max_payload: u32,
) -> Result<Message, WireError> {
    let mut raw = [0u8; HEADER_SIZE];
    read_full(r, &mut raw).await?;
    let header = FrameHeader::decode(&raw)?;

    if header.payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: header.payload_len as u64,
            max: max_payload as u64,
        });
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    read_full(r, &mut payload).await?;

    Ok(Message {
        peer_id: header.peer_id,
        kind: header.kind,
        payload: Bytes::from(payload),
    })
}

/// Fill `buf` completely, looping over short reads. EOF before the buffer is
/// full is reported with how far we got.
async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(WireError::Closed {
                read: filled,
                expected: buf.len(),
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let msg = Message::new(7, MessageType::Bet, &b"abc"[..]);
        let frame = msg.encode().unwrap();
        assert_eq!(&frame[..], &[7, 0x01, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = Message::empty(1, MessageType::Eot).encode().unwrap();
        assert_eq!(&frame[..], &[1, 0x02, 0, 0, 0, 0]);
    }

    #[test]
    fn test_roundtrip_all_types() {
        let kinds = [
            MessageType::Ack,
            MessageType::Bet,
            MessageType::Eot,
            MessageType::QueryWinners,
            MessageType::Winners,
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            let payload: Vec<u8> = (0..i * 97).map(|b| b as u8).collect();
            let msg = Message::new(255 - i as u8, kind, payload);
            let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_payload_with_separator_bytes() {
        // Length framing means newlines, commas and zero bytes pass through untouched
        let msg = Message::new(3, MessageType::Winners, &b"a,b\n\0\x01c"[..]);
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = Message::decode(&[1, 0x09, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, WireError::UnknownType(0x09)));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            Message::decode(&[1, 0x01, 0]),
            Err(WireError::Truncated { expected: 6, actual: 3 })
        ));
        assert!(matches!(
            Message::decode(&[1, 0x01, 0, 0, 0, 4, b'x']),
            Err(WireError::Truncated { expected: 10, actual: 7 })
        ));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let err = Message::decode(&[1, 0x00, 0, 0, 0, 0, 0xff]).unwrap_err();
        assert!(matches!(err, WireError::TrailingBytes(1)));
    }

    #[tokio::test]
    async fn test_stream_roundtrip_through_tiny_pipe() {
        // A 1-byte pipe forces every read and write to be partial
        let (mut client, mut server) = tokio::io::duplex(1);
        let payload: Vec<u8> = b"Santiago,Lorca,30904465,1999-03-17,7574\n".repeat(20);
        let sent = Message::new(4, MessageType::Bet, payload);

        let expected = sent.clone();
        let writer = tokio::spawn(async move {
            write_message(&mut client, &sent).await.unwrap();
            write_message(&mut client, &Message::empty(4, MessageType::Eot))
                .await
                .unwrap();
        });

        let first = read_message(&mut server).await.unwrap();
        let second = read_message(&mut server).await.unwrap();
        writer.await.unwrap();

        assert_eq!(first, expected);
        assert_eq!(second.kind, MessageType::Eot);
        assert!(second.payload.is_empty());
    }

    #[tokio::test]
    async fn test_chunked_delivery_is_transparent() {
        let frame = Message::new(2, MessageType::Winners, &b"12"[..])
            .encode()
            .unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&frame[..1])
            .read(&frame[1..4])
            .read(&frame[4..7])
            .read(&frame[7..])
            .build();

        let msg = read_message(&mut reader).await.unwrap();
        assert_eq!(msg.peer_id, 2);
        assert_eq!(msg.kind, MessageType::Winners);
        assert_eq!(msg.payload_text(), "12");
    }

    #[tokio::test]
    async fn test_chunked_writes() {
        let msg = Message::new(9, MessageType::Bet, &b"a,b,c,d,e\n"[..]);
        let frame = msg.encode().unwrap();
        let mut writer = tokio_test::io::Builder::new()
            .write(&frame[..2])
            .write(&frame[2..5])
            .write(&frame[5..])
            .build();

        write_message(&mut writer, &msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_mid_header() {
        let mut reader = tokio_test::io::Builder::new().read(&[1, 0x00, 0]).build();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Closed { read: 3, expected: 6 }));
    }

    #[tokio::test]
    async fn test_close_mid_payload_never_returns_partial() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[1, 0x04, 0, 0, 0, 5])
            .read(b"ab")
            .build();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Closed { read: 2, expected: 5 }));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_read() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[1, 0x01, 0, 0, 1, 0])
            .build();
        let err = read_message_with_limit(&mut reader, 128).await.unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { len: 256, max: 128 }));
    }
}
