use std::io;

use thiserror::Error;

use super::message::MessageId;

/// Errors that can occur while talking to a single peer.
///
/// Transport failures and protocol violations are kept apart so the caller
/// can decide whether to drop the peer or try another one.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error not covered by a more specific variant.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("dial to {0} timed out")]
    DialTimeout(std::net::SocketAddr),

    #[error("connection to {0} refused")]
    ConnectRefused(std::net::SocketAddr),

    /// A deadline-bounded step did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The stream ended before the declared number of bytes arrived.
    #[error("truncated stream")]
    TruncatedStream,

    #[error("info hash mismatch: expected {expected}, got {got}")]
    InfoHashMismatch { expected: String, got: String },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(&'static str),

    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),

    #[error("expected {expected:?} message, got {got:?}")]
    WrongMessageKind { expected: MessageId, got: MessageId },

    #[error("expected bitfield, got {0:?}")]
    ExpectedBitfield(MessageId),

    /// A frame declared more than `MAX_FRAME_LEN` bytes. On read, the frame
    /// has been skipped and the stream is still usable.
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("payload too short: {0} < 8")]
    PayloadTooShort(usize),

    #[error("expected payload length {expected}, got {got}")]
    BadPayloadLength { expected: usize, got: usize },

    #[error("expected piece index {expected}, got {got}")]
    IndexMismatch { expected: u32, got: u32 },

    #[error("begin offset too high: {begin} >= {len}")]
    OffsetOutOfRange { begin: usize, len: usize },

    #[error("data too long [{data}] for offset {begin} with length {len}")]
    DataOverflow { data: usize, begin: usize, len: usize },
}

impl PeerError {
    /// Maps a read failure, turning an unexpected EOF into [`PeerError::TruncatedStream`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PeerError::TruncatedStream
        } else {
            PeerError::Io(err)
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
