pub mod bencode_parser;
pub mod config;
pub mod peer;
pub mod torrent;
pub mod tracker;

// Re-export commonly used types and functions for easier access
pub use config::{Deadline, SessionConfig};
pub use peer::{Bitfield, Frame, Message, MessageId, PeerError, PeerSession};
pub use torrent::{Torrent, parse_torrent_bytes, parse_torrent_file};
