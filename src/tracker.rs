use std::net::Ipv4Addr;
use std::time::Duration;

use once_cell::sync::Lazy;
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::bencode_parser::{DecodeError, parse};
use crate::peer::Peer;
use crate::torrent::Torrent;

pub const PEER_ID: [u8; 20] = *b"f52c3727bfe8600e8923";
pub const DEFAULT_PORT: u16 = 6881;
const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("rs_peerwire/0.1")
        .timeout(TRACKER_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
});

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker returned status {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("invalid tracker response: {0}")]
    InvalidResponse(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds the tracker asks us to wait before announcing again.
    pub interval: i64,
    pub peers: Vec<Peer>,
}

fn encode_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, NON_ALPHANUMERIC).to_string()
}

pub fn build_tracker_url(
    torrent: &Torrent,
    peer_id: &[u8; 20],
    port: u16,
) -> Result<String, url::ParseError> {
    let mut base = Url::parse(&torrent.announce)?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        encode_bytes(&torrent.info_hash),
        encode_bytes(peer_id),
        port,
        torrent.length
    );

    let query = match base.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };
    base.set_query(Some(&query));
    Ok(base.to_string())
}

/// Splits a compact peer list: 4 bytes of IPv4 address then a big-endian port.
pub fn extract_peers(bytes: &[u8]) -> Option<Vec<Peer>> {
    if bytes.len() % 6 != 0 {
        return None;
    }
    let peers = bytes
        .chunks_exact(6)
        .map(|chunk| Peer {
            ip_addr: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
        })
        .collect();

    Some(peers)
}

pub fn parse_tracker_response(bytes: &[u8]) -> Result<TrackerResponse, TrackerError> {
    let values = parse(bytes)?;
    let dict = values
        .first()
        .ok_or(TrackerError::InvalidResponse("empty body"))?;

    if let Some(reason) = dict.get(b"failure reason").and_then(|v| v.as_bytes()) {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    let interval = dict
        .get(b"interval")
        .and_then(|v| v.as_integer())
        .ok_or(TrackerError::InvalidResponse("missing interval"))?;

    let peers = dict
        .get(b"peers")
        .and_then(|v| v.as_bytes())
        .ok_or(TrackerError::InvalidResponse("missing compact peers"))?;
    let peers =
        extract_peers(peers).ok_or(TrackerError::InvalidResponse("malformed compact peers"))?;

    Ok(TrackerResponse { interval, peers })
}

/// Announces to the torrent's tracker and returns the peers it hands out.
pub async fn announce_to_tracker(
    torrent: &Torrent,
    peer_id: &[u8; 20],
    port: u16,
) -> Result<TrackerResponse, TrackerError> {
    let url = build_tracker_url(torrent, peer_id, port)?;
    debug!(%url, "announcing");

    let response = HTTP_CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(TrackerError::Status(response.status()));
    }

    let bytes = response.bytes().await?;
    let response = parse_tracker_response(&bytes)?;
    info!(
        peers = response.peers.len(),
        interval = response.interval,
        "tracker answered"
    );
    Ok(response)
}
