//! Peer wire protocol: handshake, message framing, piece bitmaps and a
//! single-connection session built on top of them.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub mod bitfield;
pub mod error;
pub mod handshake;
pub mod message;
pub mod session;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use handshake::Handshake;
pub use message::{BlockRequest, Frame, Message, MessageId};
pub use session::PeerSession;

pub const PSTR: &str = "BitTorrent protocol";
pub const PSTR_LEN: u8 = PSTR.len() as u8; // always 19

/// A peer address as handed out by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.port))
    }
}

impl From<Peer> for SocketAddr {
    fn from(peer: Peer) -> Self {
        peer.addr()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_addr, self.port)
    }
}
