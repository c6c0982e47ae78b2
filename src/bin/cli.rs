use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rs_peerwire::config::SessionConfig;
use rs_peerwire::peer::message::{parse_have, parse_piece};
use rs_peerwire::peer::{Frame, MessageId, PeerSession};
use rs_peerwire::torrent::{Torrent, parse_torrent_file};
use rs_peerwire::tracker::{DEFAULT_PORT, PEER_ID, announce_to_tracker};
use sha1::{Digest, Sha1};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const BLOCK_SIZE: usize = 16384;
const MAX_BACKLOG: usize = 5;
const PIECE_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens a session with a peer of a torrent's swarm and optionally fetches one piece.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the .torrent file.
    #[arg(short, long)]
    file: PathBuf,

    /// Connect to this peer instead of asking the tracker.
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// Port reported to the tracker.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Download and verify this piece from the peer.
    #[arg(long)]
    piece: Option<usize>,

    /// Where to write the downloaded piece.
    #[arg(short, long, requires = "piece")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let torrent = parse_torrent_file(&args.file)?;
    info!(
        name = %torrent.name,
        pieces = torrent.piece_count(),
        length = torrent.length,
        "torrent loaded"
    );

    let peers: Vec<SocketAddr> = match args.peer {
        Some(addr) => vec![addr],
        None => announce_to_tracker(&torrent, &PEER_ID, args.port)
            .await?
            .peers
            .into_iter()
            .map(SocketAddr::from)
            .collect(),
    };

    let config = SessionConfig::default();
    let mut session = open_first(&peers, &torrent, &config)
        .await
        .ok_or("no peer completed the handshake")?;
    info!(
        peer = %session.addr(),
        has = session.bitfield().count_pieces(),
        of = torrent.piece_count(),
        "peer bitfield"
    );

    if let Some(index) = args.piece {
        let data = fetch_piece(&mut session, &torrent, index).await?;
        let hash: [u8; 20] = Sha1::digest(&data).into();
        if hash != torrent.piece_hashes[index] {
            return Err(format!("piece {index} failed its integrity check").into());
        }
        info!(index, bytes = data.len(), "piece verified");

        if let Some(path) = args.output {
            tokio::fs::write(&path, &data).await?;
            info!(path = %path.display(), "piece written");
        }
    }

    session.shutdown().await?;
    Ok(())
}

/// Tries peers in order and keeps the first one that becomes a session.
async fn open_first(
    peers: &[SocketAddr],
    torrent: &Torrent,
    config: &SessionConfig,
) -> Option<PeerSession> {
    for addr in peers {
        match PeerSession::connect(*addr, PEER_ID, torrent.info_hash, config).await {
            Ok(session) => return Some(session),
            Err(e) => warn!(%addr, error = %e, "could not open session"),
        }
    }
    None
}

/// Requests every block of one piece from a single peer, keeping a small
/// backlog of outstanding requests while unchoked.
async fn fetch_piece(
    session: &mut PeerSession,
    torrent: &Torrent,
    index: usize,
) -> Result<Vec<u8>, Box<dyn Error>> {
    if index >= torrent.piece_count() {
        return Err(format!("piece {index} does not exist").into());
    }
    if !session.bitfield().has_piece(index) {
        return Err(format!("peer does not have piece {index}").into());
    }

    let size = torrent.piece_size(index) as usize;
    let mut buf = vec![0u8; size];
    let mut progress = PieceProgress::new(size);

    session.send_unchoke().await?;
    session.send_interested().await?;

    while !progress.is_done() {
        if !session.is_choked() {
            while let Some((begin, length)) = progress.next_request() {
                session
                    .send_request(index as u32, begin as u32, length as u32)
                    .await?;
            }
        }

        let Frame::Message(msg) = timeout(PIECE_READ_TIMEOUT, session.read()).await?? else {
            continue;
        };
        match msg.kind() {
            MessageId::Choke => {
                session.set_choked(true);
                progress.choked();
            }
            MessageId::Unchoke => session.set_choked(false),
            MessageId::Have => {
                let have = parse_have(&msg)?;
                session.bitfield_mut().set_piece(have as usize);
            }
            MessageId::Piece => {
                let n = parse_piece(index as u32, &mut buf, &msg)?;
                progress.received(n);
            }
            _ => {}
        }
    }

    Ok(buf)
}

/// Block bookkeeping for one piece fetched from one peer.
#[derive(Debug)]
struct PieceProgress {
    size: usize,
    requested: usize,
    downloaded: usize,
    backlog: usize,
}

impl PieceProgress {
    fn new(size: usize) -> Self {
        Self {
            size,
            requested: 0,
            downloaded: 0,
            backlog: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.downloaded >= self.size
    }

    /// The next block to ask for, if the backlog has room.
    fn next_request(&mut self) -> Option<(usize, usize)> {
        if self.backlog >= MAX_BACKLOG || self.requested >= self.size {
            return None;
        }
        let begin = self.requested;
        let length = BLOCK_SIZE.min(self.size - begin);
        self.backlog += 1;
        self.requested += length;
        Some((begin, length))
    }

    fn received(&mut self, n: usize) {
        self.downloaded += n;
        self.backlog = self.backlog.saturating_sub(1);
    }

    /// A choking peer discards our outstanding requests.
    fn choked(&mut self) {
        self.backlog = 0;
        self.requested = self.downloaded;
    }
}
