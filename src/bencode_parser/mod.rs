//! Bencode decoding for torrent files and tracker responses.

pub mod errors;
pub mod parser;

pub use errors::{BencodeError, DecodeError};
pub use parser::{Value, parse};
