use std::io;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::bitfield::Bitfield;
use super::error::{PeerError, hex};
use super::handshake::{self, Handshake};
use super::message::{Frame, Message, MessageId, format_have, format_request};
use crate::config::{Deadline, SessionConfig};

/// One live connection to one peer, past the handshake and the initial
/// bitfield.
///
/// A session is driven by a single task; every I/O call takes `&mut self`.
/// Steady-state calls carry no deadline of their own: wrap them in
/// [`tokio::time::timeout`] or drop the session to abandon a peer.
///
/// The session never changes its choke flag by itself. Whoever drives
/// [`PeerSession::read`] reacts to choke/unchoke through
/// [`PeerSession::set_choked`], and to have messages through
/// [`PeerSession::bitfield_mut`].
#[derive(Debug)]
pub struct PeerSession {
    stream: TcpStream,
    choked: bool,
    bitfield: Bitfield,
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    remote_peer_id: [u8; 20],
}

impl PeerSession {
    /// Dials `addr`, exchanges handshakes and waits for the peer's bitfield.
    ///
    /// Each step runs under its own deadline from `config`. On any failure
    /// the connection is closed before the error is returned.
    pub async fn connect(
        addr: SocketAddr,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        config: &SessionConfig,
    ) -> Result<Self, PeerError> {
        let mut stream = dial(addr, config.dial).await?;
        debug!(%addr, "connected");

        let ours = Handshake::new(info_hash, peer_id);
        let theirs = handshake::exchange(&mut stream, &ours, config.handshake).await?;

        let bitfield = recv_bitfield(&mut stream, config.bitfield).await?;
        info!(
            %addr,
            remote_peer_id = %hex(&theirs.peer_id),
            pieces = bitfield.count_pieces(),
            "session ready"
        );

        Ok(Self {
            stream,
            choked: true,
            bitfield,
            addr,
            info_hash,
            peer_id,
            remote_peer_id: theirs.peer_id,
        })
    }

    /// Reads the next frame. Keep-alives are returned, not skipped.
    pub async fn read(&mut self) -> Result<Frame, PeerError> {
        let frame = Frame::read(&mut self.stream).await?;
        debug!(addr = %self.addr, %frame, "received");
        Ok(frame)
    }

    /// Writes any frame; the `send_*` helpers cover the common ones.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), PeerError> {
        frame.write(&mut self.stream).await?;
        debug!(addr = %self.addr, %frame, "sent");
        Ok(())
    }

    pub async fn send_request(
        &mut self,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        self.send(&format_request(index, begin, length).into())
            .await
    }

    pub async fn send_interested(&mut self) -> Result<(), PeerError> {
        self.send(&Message::empty(MessageId::Interested).into())
            .await
    }

    pub async fn send_unchoke(&mut self) -> Result<(), PeerError> {
        self.send(&Message::empty(MessageId::Unchoke).into()).await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<(), PeerError> {
        self.send(&format_have(index).into()).await
    }

    /// Closes our write half; the peer sees end of stream.
    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Whether the peer is currently refusing our requests. Starts `true`.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    /// The pieces the peer has advertised.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.info_hash
    }

    /// Our own peer id, as sent in the handshake.
    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }

    /// The peer id the remote claimed in its handshake. Not verified.
    pub fn remote_peer_id(&self) -> &[u8; 20] {
        &self.remote_peer_id
    }
}

async fn dial(addr: SocketAddr, deadline: Deadline) -> Result<TcpStream, PeerError> {
    let connect = TcpStream::connect(addr);
    let result = match deadline.limit() {
        Some(limit) => timeout(limit, connect)
            .await
            .map_err(|_| PeerError::DialTimeout(addr))?,
        None => connect.await,
    };

    result.map_err(|err| dial_error(addr, err))
}

fn dial_error(addr: SocketAddr, err: io::Error) -> PeerError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => PeerError::ConnectRefused(addr),
        io::ErrorKind::TimedOut => PeerError::DialTimeout(addr),
        _ => PeerError::Io(err),
    }
}

async fn recv_bitfield(stream: &mut TcpStream, deadline: Deadline) -> Result<Bitfield, PeerError> {
    match deadline.run("bitfield", Frame::read(stream)).await? {
        Frame::KeepAlive => Err(PeerError::ProtocolViolation(
            "expected bitfield, got keep-alive",
        )),
        Frame::Message(msg) => Bitfield::try_from(msg),
    }
}
