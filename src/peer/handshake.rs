use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::error::{PeerError, hex};
use super::PSTR;
use crate::config::Deadline;

/// The first thing both sides send on a new connection.
///
/// `<pstrlen><pstr><8 reserved bytes><info_hash><peer_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pstr: Vec<u8>,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            pstr: PSTR.as_bytes().to_vec(),
            info_hash,
            peer_id,
        }
    }

    /// The protocol identifier, `"BitTorrent protocol"` for handshakes we build.
    pub fn pstr(&self) -> &[u8] {
        &self.pstr
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.pstr.len() + 49);
        buf.push(self.pstr.len() as u8);
        buf.extend_from_slice(&self.pstr);
        buf.extend_from_slice(&[0u8; 8]); // reserved
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Reads one handshake. The leading length byte decides how many bytes
    /// follow (`48 + pstrlen`); reserved bytes are ignored.
    pub async fn read<R>(reader: &mut R) -> Result<Self, PeerError>
    where
        R: AsyncRead + Unpin,
    {
        let pstr_len = reader.read_u8().await.map_err(PeerError::from_read)? as usize;
        if pstr_len == 0 {
            return Err(PeerError::MalformedHandshake("pstrlen cannot be 0"));
        }

        let mut buf = vec![0u8; 48 + pstr_len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(PeerError::from_read)?;

        let mut info_hash = [0u8; 20];
        let mut peer_id = [0u8; 20];
        info_hash.copy_from_slice(&buf[pstr_len + 8..pstr_len + 28]);
        peer_id.copy_from_slice(&buf[pstr_len + 28..]);

        buf.truncate(pstr_len);
        Ok(Self {
            pstr: buf,
            info_hash,
            peer_id,
        })
    }
}

/// Sends our handshake and waits for the peer's reply, all within `deadline`.
///
/// Only the info hash of the reply is checked; the peer id it carries is
/// taken as-is.
pub async fn exchange<S>(
    stream: &mut S,
    ours: &Handshake,
    deadline: Deadline,
) -> Result<Handshake, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let theirs = deadline
        .run("handshake", async {
            stream.write_all(&ours.serialize()).await?;
            stream.flush().await?;
            Handshake::read(stream).await
        })
        .await?;

    if theirs.info_hash != ours.info_hash {
        return Err(PeerError::InfoHashMismatch {
            expected: hex(&ours.info_hash),
            got: hex(&theirs.info_hash),
        });
    }

    debug!(peer_id = %hex(&theirs.peer_id), "handshake complete");
    Ok(theirs)
}
