use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::bitfield::Bitfield;
use super::error::PeerError;

/// Frames declaring more than this many bytes are rejected before allocating.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Piece),
            8 => Ok(Self::Cancel),
            _ => Err(PeerError::UnknownMessageKind(value)),
        }
    }
}

/// A single peer wire message: one kind byte and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageId,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageId, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// A message of `kind` with an empty payload.
    pub fn empty(kind: MessageId) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn kind(&self) -> MessageId {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Length prefix, kind byte and payload.
    ///
    /// The payload must fit a frame of [`MAX_FRAME_LEN`] bytes;
    /// [`Frame::write`] refuses larger messages.
    pub fn serialize(&self) -> Vec<u8> {
        let total_len = 1 + self.payload.len(); // 1 byte for ID
        debug_assert!(total_len <= MAX_FRAME_LEN, "message exceeds MAX_FRAME_LEN");
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);

        buf
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [{}]", self.kind, self.payload.len())
    }
}

/// What comes off the wire after the handshake: either a message or a
/// zero-length keep-alive that carries nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    KeepAlive,
    Message(Message),
}

impl Frame {
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::KeepAlive => vec![0; 4],
            Frame::Message(msg) => msg.serialize(),
        }
    }

    /// Reads exactly one frame.
    ///
    /// A short read on either the length prefix or the body yields
    /// [`PeerError::TruncatedStream`]. Frames that are rejected after their
    /// length is known (unknown kind, over [`MAX_FRAME_LEN`]) are consumed
    /// whole, so the next call starts at the following frame.
    pub async fn read<R>(reader: &mut R) -> Result<Self, PeerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(PeerError::from_read)?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Ok(Frame::KeepAlive);
        }
        if len > MAX_FRAME_LEN {
            skip(reader, len as u64).await?;
            return Err(PeerError::FrameTooLarge(len));
        }

        let kind = reader.read_u8().await.map_err(PeerError::from_read)?;
        let mut payload = vec![0u8; len - 1];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(PeerError::from_read)?;

        let kind = MessageId::try_from(kind)?;
        Ok(Frame::Message(Message::new(kind, payload)))
    }

    pub async fn write<W>(&self, writer: &mut W) -> Result<(), PeerError>
    where
        W: AsyncWrite + Unpin,
    {
        if let Frame::Message(msg) = self {
            let len = 1 + msg.payload.len();
            if len > MAX_FRAME_LEN {
                return Err(PeerError::FrameTooLarge(len));
            }
        }
        writer.write_all(&self.serialize()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Discards exactly `len` bytes from `reader`.
async fn skip<R>(reader: &mut R, len: u64) -> Result<(), PeerError>
where
    R: AsyncRead + Unpin,
{
    let mut body = (&mut *reader).take(len);
    let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink())
        .await
        .map_err(PeerError::from_read)?;
    if skipped < len {
        return Err(PeerError::TruncatedStream);
    }
    Ok(())
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        Frame::Message(msg)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::KeepAlive => f.write_str("KeepAlive"),
            Frame::Message(msg) => fmt::Display::fmt(msg, f),
        }
    }
}

/// A block address as carried by request and cancel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

fn block_payload(index: u32, begin: u32, length: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(&length.to_be_bytes());
    payload
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn format_request(index: u32, begin: u32, length: u32) -> Message {
    Message::new(MessageId::Request, block_payload(index, begin, length))
}

pub fn format_cancel(index: u32, begin: u32, length: u32) -> Message {
    Message::new(MessageId::Cancel, block_payload(index, begin, length))
}

pub fn format_have(index: u32) -> Message {
    Message::new(MessageId::Have, index.to_be_bytes().to_vec())
}

/// Copies the block carried by a piece message into `buf` at its `begin`
/// offset and returns the number of bytes written.
///
/// Every check runs before anything is copied.
pub fn parse_piece(index: u32, buf: &mut [u8], msg: &Message) -> Result<usize, PeerError> {
    if msg.kind != MessageId::Piece {
        return Err(PeerError::WrongMessageKind {
            expected: MessageId::Piece,
            got: msg.kind,
        });
    }
    if msg.payload.len() < 8 {
        return Err(PeerError::PayloadTooShort(msg.payload.len()));
    }

    let parsed_index = read_u32(&msg.payload[0..4]);
    if parsed_index != index {
        return Err(PeerError::IndexMismatch {
            expected: index,
            got: parsed_index,
        });
    }

    let begin = read_u32(&msg.payload[4..8]) as usize;
    if begin >= buf.len() {
        return Err(PeerError::OffsetOutOfRange {
            begin,
            len: buf.len(),
        });
    }

    let data = &msg.payload[8..];
    if data.len() > buf.len() - begin {
        return Err(PeerError::DataOverflow {
            data: data.len(),
            begin,
            len: buf.len(),
        });
    }

    buf[begin..begin + data.len()].copy_from_slice(data);
    Ok(data.len())
}

pub fn parse_have(msg: &Message) -> Result<u32, PeerError> {
    if msg.kind != MessageId::Have {
        return Err(PeerError::WrongMessageKind {
            expected: MessageId::Have,
            got: msg.kind,
        });
    }
    if msg.payload.len() != 4 {
        return Err(PeerError::BadPayloadLength {
            expected: 4,
            got: msg.payload.len(),
        });
    }
    Ok(read_u32(&msg.payload))
}

/// Decodes a request or cancel message.
pub fn parse_request(msg: &Message) -> Result<BlockRequest, PeerError> {
    if !matches!(msg.kind, MessageId::Request | MessageId::Cancel) {
        return Err(PeerError::WrongMessageKind {
            expected: MessageId::Request,
            got: msg.kind,
        });
    }
    if msg.payload.len() != 12 {
        return Err(PeerError::BadPayloadLength {
            expected: 12,
            got: msg.payload.len(),
        });
    }
    Ok(BlockRequest {
        index: read_u32(&msg.payload[0..4]),
        begin: read_u32(&msg.payload[4..8]),
        length: read_u32(&msg.payload[8..12]),
    })
}

impl From<Bitfield> for Message {
    fn from(b: Bitfield) -> Self {
        Message::new(MessageId::Bitfield, b.into_bytes())
    }
}

impl TryFrom<Message> for Bitfield {
    type Error = PeerError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        if msg.kind != MessageId::Bitfield {
            return Err(PeerError::ExpectedBitfield(msg.kind));
        }
        Ok(Bitfield::from_bytes(msg.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ALL_KINDS: [MessageId; 9] = [
        MessageId::Choke,
        MessageId::Unchoke,
        MessageId::Interested,
        MessageId::NotInterested,
        MessageId::Have,
        MessageId::Bitfield,
        MessageId::Request,
        MessageId::Piece,
        MessageId::Cancel,
    ];

    fn piece(index: u32, begin: u32, data: &[u8]) -> Message {
        let mut payload = Vec::new();
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(data);
        Message::new(MessageId::Piece, payload)
    }

    #[test]
    fn test_message_id_try_from() {
        for (value, kind) in ALL_KINDS.iter().enumerate() {
            assert_eq!(MessageId::try_from(value as u8).unwrap(), *kind);
            assert_eq!(*kind as u8, value as u8);
        }
        assert_matches!(MessageId::try_from(9), Err(PeerError::UnknownMessageKind(9)));
        assert_matches!(
            MessageId::try_from(255),
            Err(PeerError::UnknownMessageKind(255))
        );
    }

    #[test]
    fn test_message_serialize_no_payload() {
        let serialized = Message::empty(MessageId::Choke).serialize();
        assert_eq!(serialized, vec![0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_message_serialize_with_payload() {
        let msg = Message::new(MessageId::Have, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(msg.serialize(), vec![0, 0, 0, 5, 4, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_keep_alive_serializes_to_zero_length() {
        assert_eq!(Frame::KeepAlive.serialize(), vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_keep_alive() {
        let mut wire: &[u8] = &[0, 0, 0, 0];
        assert_eq!(Frame::read(&mut wire).await.unwrap(), Frame::KeepAlive);
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_read_every_kind() {
        for kind in ALL_KINDS {
            let msg = Message::new(kind, vec![kind as u8, 0xFF, 0x00, 0xAA]);
            let bytes = msg.serialize();
            let mut wire = bytes.as_slice();
            let frame = Frame::read(&mut wire).await.unwrap();
            assert_eq!(frame, Frame::Message(msg));
        }
    }

    #[tokio::test]
    async fn test_read_consumes_one_frame_at_a_time() {
        let mut bytes = Message::empty(MessageId::Unchoke).serialize();
        bytes.extend(Frame::KeepAlive.serialize());
        bytes.extend(format_have(3).serialize());
        let mut wire = bytes.as_slice();

        assert_eq!(
            Frame::read(&mut wire).await.unwrap(),
            Frame::Message(Message::empty(MessageId::Unchoke))
        );
        assert_eq!(Frame::read(&mut wire).await.unwrap(), Frame::KeepAlive);
        assert_eq!(
            Frame::read(&mut wire).await.unwrap(),
            Frame::Message(format_have(3))
        );
    }

    #[tokio::test]
    async fn test_read_truncated_length() {
        let mut wire: &[u8] = &[0, 0, 0];
        assert_matches!(Frame::read(&mut wire).await, Err(PeerError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_read_truncated_body() {
        let mut wire: &[u8] = &[0, 0, 0, 5, 4, 0x12];
        assert_matches!(Frame::read(&mut wire).await, Err(PeerError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_read_unknown_kind() {
        let mut wire: &[u8] = &[0, 0, 0, 1, 99];
        assert_matches!(
            Frame::read(&mut wire).await,
            Err(PeerError::UnknownMessageKind(99))
        );
    }

    #[tokio::test]
    async fn test_read_unknown_kind_keeps_stream_aligned() {
        let mut bytes = vec![0, 0, 0, 3, 42, 0xAA, 0xBB];
        bytes.extend(format_have(9).serialize());
        let mut wire = bytes.as_slice();

        assert_matches!(
            Frame::read(&mut wire).await,
            Err(PeerError::UnknownMessageKind(42))
        );
        assert_eq!(
            Frame::read(&mut wire).await.unwrap(),
            Frame::Message(format_have(9))
        );
    }

    #[tokio::test]
    async fn test_read_oversized_frame_is_skipped() {
        let len = MAX_FRAME_LEN + 1;
        let mut bytes = (len as u32).to_be_bytes().to_vec();
        bytes.push(MessageId::Piece as u8);
        bytes.resize(4 + len, 0x07);
        bytes.extend(Message::empty(MessageId::Unchoke).serialize());
        let mut wire = bytes.as_slice();

        assert_matches!(
            Frame::read(&mut wire).await,
            Err(PeerError::FrameTooLarge(l)) if l == len
        );
        assert_eq!(
            Frame::read(&mut wire).await.unwrap(),
            Frame::Message(Message::empty(MessageId::Unchoke))
        );
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_read_oversized_frame_cut_short() {
        let mut wire: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 7];
        assert_matches!(Frame::read(&mut wire).await, Err(PeerError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_write_refuses_oversized_message() {
        let msg = Message::new(MessageId::Piece, vec![0; MAX_FRAME_LEN]);
        let mut sent = Vec::new();
        assert_matches!(
            Frame::from(msg).write(&mut sent).await,
            Err(PeerError::FrameTooLarge(l)) if l == MAX_FRAME_LEN + 1
        );
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let msg = format_request(1, 16384, 16384);

        Frame::from(msg.clone()).write(&mut client).await.unwrap();
        Frame::KeepAlive.write(&mut client).await.unwrap();

        assert_eq!(Frame::read(&mut server).await.unwrap(), Frame::Message(msg));
        assert_eq!(Frame::read(&mut server).await.unwrap(), Frame::KeepAlive);
    }

    #[test]
    fn test_format_request() {
        let msg = format_request(4, 567, 4321);
        assert_eq!(msg.kind(), MessageId::Request);
        assert_eq!(
            msg.payload(),
            &[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x37, 0x00, 0x00, 0x10, 0xE1]
        );
    }

    #[test]
    fn test_format_have() {
        let msg = format_have(4);
        assert_eq!(msg.kind(), MessageId::Have);
        assert_eq!(msg.payload(), &[0x00, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_parse_request_and_cancel() {
        let expected = BlockRequest {
            index: 4,
            begin: 567,
            length: 4321,
        };
        assert_eq!(parse_request(&format_request(4, 567, 4321)).unwrap(), expected);
        assert_eq!(parse_request(&format_cancel(4, 567, 4321)).unwrap(), expected);
        assert_matches!(
            parse_request(&Message::new(MessageId::Request, vec![0; 11])),
            Err(PeerError::BadPayloadLength {
                expected: 12,
                got: 11
            })
        );
        assert_matches!(
            parse_request(&format_have(1)),
            Err(PeerError::WrongMessageKind { .. })
        );
    }

    #[test]
    fn test_parse_piece_copies_block() {
        let mut buf = [0u8; 10];
        let n = parse_piece(5, &mut buf, &piece(5, 2, &[0xAA, 0xBB])).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf, [0, 0, 0xAA, 0xBB, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_piece_fills_to_the_end() {
        let mut buf = [0u8; 4];
        let n = parse_piece(0, &mut buf, &piece(0, 1, &[1, 2, 3])).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_piece_wrong_kind() {
        let mut buf = [0u8; 10];
        let msg = Message::new(MessageId::Choke, vec![]);
        assert_matches!(
            parse_piece(5, &mut buf, &msg),
            Err(PeerError::WrongMessageKind {
                expected: MessageId::Piece,
                got: MessageId::Choke
            })
        );
    }

    #[test]
    fn test_parse_piece_payload_too_short() {
        let mut buf = [0u8; 10];
        let msg = Message::new(MessageId::Piece, vec![0, 0, 0, 5, 0, 0, 0]);
        assert_matches!(
            parse_piece(5, &mut buf, &msg),
            Err(PeerError::PayloadTooShort(7))
        );
    }

    #[test]
    fn test_parse_piece_index_mismatch() {
        let mut buf = [0u8; 10];
        assert_matches!(
            parse_piece(6, &mut buf, &piece(5, 2, &[0xAA, 0xBB])),
            Err(PeerError::IndexMismatch {
                expected: 6,
                got: 5
            })
        );
        assert_eq!(buf, [0u8; 10]);
    }

    #[test]
    fn test_parse_piece_offset_out_of_range() {
        let mut buf = [0u8; 10];
        assert_matches!(
            parse_piece(5, &mut buf, &piece(5, 10, &[0xAA, 0xBB])),
            Err(PeerError::OffsetOutOfRange { begin: 10, len: 10 })
        );
    }

    #[test]
    fn test_parse_piece_data_overflow() {
        let mut buf = [0u8; 10];
        assert_matches!(
            parse_piece(5, &mut buf, &piece(5, 9, &[0xAA, 0xBB])),
            Err(PeerError::DataOverflow {
                data: 2,
                begin: 9,
                len: 10
            })
        );
        assert_eq!(buf, [0u8; 10]);
    }

    #[test]
    fn test_parse_have() {
        let msg = Message::new(MessageId::Have, vec![0, 0, 0, 7]);
        assert_eq!(parse_have(&msg).unwrap(), 7);
    }

    #[test]
    fn test_parse_have_bad_length() {
        for len in [0usize, 3, 5, 8] {
            let msg = Message::new(MessageId::Have, vec![0; len]);
            assert_matches!(
                parse_have(&msg),
                Err(PeerError::BadPayloadLength { expected: 4, got }) if got == len
            );
        }
    }

    #[test]
    fn test_parse_have_wrong_kind() {
        let msg = Message::new(MessageId::Piece, vec![0, 0, 0, 7]);
        assert_matches!(parse_have(&msg), Err(PeerError::WrongMessageKind { .. }));
    }

    #[test]
    fn test_bitfield_message_conversions() {
        let message: Message = Bitfield::from_bytes(vec![0xAB, 0xCD]).into();
        assert_eq!(message.kind(), MessageId::Bitfield);
        assert_eq!(message.payload(), &[0xAB, 0xCD]);

        let bitfield = Bitfield::try_from(message).unwrap();
        assert_eq!(bitfield.as_bytes(), &[0xAB, 0xCD]);

        let have = format_have(1);
        assert_matches!(
            Bitfield::try_from(have),
            Err(PeerError::ExpectedBitfield(MessageId::Have))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Frame::KeepAlive.to_string(), "KeepAlive");
        assert_eq!(Frame::from(format_have(1)).to_string(), "Have [4]");
        assert_eq!(
            Message::empty(MessageId::NotInterested).to_string(),
            "NotInterested [0]"
        );
    }
}
