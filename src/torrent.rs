use std::{fs, io, path::Path};

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode_parser::{DecodeError, Value, parse};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{0}'")]
    InvalidField(&'static str),

    #[error("received malformed pieces of length {0}")]
    MalformedPieces(usize),
}

/// A single-file torrent descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub announce: String,
    pub info_hash: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: u64,
    pub length: u64,
    pub name: String,
}

impl Torrent {
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[begin, end)` that piece `index` covers in the content.
    /// The last piece may be shorter than `piece_length`.
    pub fn piece_bounds(&self, index: usize) -> (u64, u64) {
        let begin = index as u64 * self.piece_length;
        let end = (begin + self.piece_length).min(self.length);
        (begin.min(end), end)
    }

    pub fn piece_size(&self, index: usize) -> u64 {
        let (begin, end) = self.piece_bounds(index);
        end - begin
    }
}

fn get_string(dict: &Value<'_>, key: &'static str) -> Result<String, TorrentError> {
    let bytes = dict
        .get(key.as_bytes())
        .ok_or(TorrentError::MissingField(key))?
        .as_bytes()
        .ok_or(TorrentError::InvalidField(key))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| TorrentError::InvalidField(key))
}

fn get_u64(dict: &Value<'_>, key: &'static str) -> Result<u64, TorrentError> {
    let value = dict
        .get(key.as_bytes())
        .ok_or(TorrentError::MissingField(key))?
        .as_integer()
        .ok_or(TorrentError::InvalidField(key))?;
    u64::try_from(value).map_err(|_| TorrentError::InvalidField(key))
}

fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>, TorrentError> {
    if pieces.len() % 20 != 0 {
        return Err(TorrentError::MalformedPieces(pieces.len()));
    }
    Ok(pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

/// Parse torrent from file path
pub fn parse_torrent_file(path: impl AsRef<Path>) -> Result<Torrent, TorrentError> {
    let data = fs::read(path)?;
    parse_torrent_bytes(&data)
}

/// Parse torrent from byte slice
pub fn parse_torrent_bytes(data: &[u8]) -> Result<Torrent, TorrentError> {
    let parsed = parse(data)?;
    let top_level = parsed.first().ok_or(TorrentError::MissingField("info"))?;

    let announce = get_string(top_level, "announce")?;
    let info = top_level
        .get(b"info")
        .ok_or(TorrentError::MissingField("info"))?;
    let Value::Dictionary { raw, .. } = info else {
        return Err(TorrentError::InvalidField("info"));
    };

    let pieces = info
        .get(b"pieces")
        .ok_or(TorrentError::MissingField("pieces"))?
        .as_bytes()
        .ok_or(TorrentError::InvalidField("pieces"))?;

    let piece_length = get_u64(info, "piece length")?;
    if piece_length == 0 {
        return Err(TorrentError::InvalidField("piece length"));
    }

    Ok(Torrent {
        announce,
        info_hash: Sha1::digest(raw).into(),
        piece_hashes: split_piece_hashes(pieces)?,
        piece_length,
        length: get_u64(info, "length")?,
        name: get_string(info, "name")?,
    })
}
