//! Outbound requests and the ambient maintenance sweeps.
//!
//! Three sweeps keep the swarm healthy, each a cancellable task:
//!
//! - **alive** (~60 s): handshake-ping every known peer and record the
//!   verdict.
//! - **neighbour top-up** (~37 s): drop peers that are off and
//!   clientless, then ask the remaining ones for their neighbour lists
//!   until each generation knows at least ten peers.
//! - **encoder idle** (3 min): reclaim encoders unused for ten seconds.
//!
//! Piece streams run one task per connection: handshake with the
//! stream bit set, then a frame-read loop that forwards into the
//! generation's bounded inbound queue, blocking (and thereby
//! backpressuring the socket) when the decoder is saturated.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::directory::{Directory, MAX_NEIGHBOURS};
use crate::file::SharedFile;
use crate::generation::Generation;
use crate::peer::split_host_port;
use crate::wire::{self, Handshake, WireError};

/// Per-peer connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cadence of the alive-check sweep.
pub const ALIVE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the neighbour top-up sweep.
pub const NEIGHBOUR_SWEEP_INTERVAL: Duration = Duration::from_secs(37);

/// Cadence of the idle-encoder sweep.
pub const ENCODER_SWEEP_INTERVAL: Duration = Duration::from_secs(180);

async fn connect(addr: &str) -> Result<TcpStream, WireError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            WireError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })??;
    Ok(stream)
}

/// Send `request`, read the response handshake, and check the protocol
/// prefix. Flag/infohash policy is the caller's business.
async fn exchange(socket: &mut TcpStream, request: &Handshake) -> Result<Handshake, WireError> {
    request.write(socket).await?;
    Handshake::read(socket).await
}

// ─── One-shot requests ──────────────────────────────────────────────────────

/// Handshake-ping a peer: true iff it answers with the alive bit echoed.
pub async fn is_alive(addr: &str, own_port: u16) -> bool {
    let Ok(mut socket) = connect(addr).await else {
        return false;
    };
    match exchange(&mut socket, &Handshake::alive(own_port)).await {
        Ok(response) => response.is_alive_ping(),
        Err(_) => false,
    }
}

/// Ask a peer for its neighbour list for one generation.
pub async fn fetch_neighbours(
    addr: &str,
    info_hash: [u8; 20],
    own_port: u16,
) -> Result<Vec<String>, WireError> {
    let mut socket = connect(addr).await?;
    let response = exchange(&mut socket, &Handshake::neighbours(info_hash, own_port)).await?;
    if !response.wants_neighbours() {
        return Err(WireError::BadProtocol);
    }
    if !response.knows_generation() {
        return Err(WireError::UnknownInfoHash);
    }
    wire::read_neighbours(&mut socket).await
}

/// Stream coded pieces from `addr` into the generation's inbound queue
/// until the server stops writing, the queue is dropped, or `cancel`
/// fires.
pub async fn stream_pieces(
    addr: &str,
    generation: &Arc<Generation>,
    own_port: u16,
    cancel: CancellationToken,
) -> Result<(), WireError> {
    let mut socket = connect(addr).await?;
    let request = Handshake::pieces(generation.info().hash, own_port);
    let response = exchange(&mut socket, &request).await?;
    if !response.wants_pieces() {
        return Err(WireError::BadProtocol);
    }
    if !response.knows_generation() {
        return Err(WireError::UnknownInfoHash);
    }

    let Some(inbound) = generation.inbound().await else {
        return Ok(()); // not receiving any more
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = wire::read_coded_piece(&mut socket) => {
                let coded_piece = frame?;
                // A full queue blocks here, throttling the socket reads.
                if inbound.send(coded_piece).await.is_err() {
                    return Ok(()); // ingestion stopped
                }
            }
        }
    }
}

// ─── Download fan-out ───────────────────────────────────────────────────────

/// Put a generation into the receiving state and attach one piece-stream
/// client to every usable peer.
pub async fn request_generation(directory: &Arc<Directory>, generation: &Arc<Generation>) {
    if generation.is_downloaded().await {
        return;
    }
    info!(hash = %hex::encode(generation.info().hash), "requesting generation");
    generation.start_receiving().await;

    let own_port = directory.port();
    for peer in generation.peers().await {
        if !peer.is_on || peer.have_client {
            continue;
        }
        let cancel = CancellationToken::new();
        generation.register_connection(cancel.clone()).await;
        generation.set_peer_client(&peer.addr, true).await;

        let generation = Arc::clone(generation);
        let addr = peer.addr.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_pieces(&addr, &generation, own_port, cancel).await {
                debug!(addr = %addr, error = %e, "piece stream ended");
            }
            generation.set_peer_client(&addr, false).await;
        });
    }
}

/// Kick off reception of every generation of a file that is still
/// missing.
pub async fn request_file(directory: &Arc<Directory>, file: &Arc<SharedFile>) {
    for generation in file.generations() {
        request_generation(directory, generation).await;
    }
}

// ─── Self detection ─────────────────────────────────────────────────────────

/// Whether `addr` names this node's own listener. Undecidable addresses
/// are treated as foreign; this can log but never fail.
fn is_self(directory: &Directory, addr: &str) -> bool {
    let Some((host, port)) = split_host_port(addr) else {
        debug!(addr, "unparseable neighbour address, assuming foreign");
        return false;
    };
    if port != directory.port() {
        return false;
    }
    host == directory.host()
        || matches!(host, "127.0.0.1" | "::1" | "localhost" | "0.0.0.0" | "::")
}

// ─── Ambient sweeps ─────────────────────────────────────────────────────────

/// Ping every known peer, record who answered, and re-attach stream
/// clients to generations still downloading (fresh peers found by the
/// neighbour sweep get dialed here).
pub fn spawn_alive_sweep(
    directory: Arc<Directory>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ALIVE_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            for peer in directory.peer_status_list().await {
                let alive = is_alive(&peer.addr, directory.port()).await;
                directory.update_peer_status(&peer.addr, alive).await;
            }
            for file in directory.files().await {
                for generation in file.generations() {
                    if generation.is_downloading().await {
                        request_generation(&directory, generation).await;
                    }
                }
            }
        }
    })
}

/// Keep every generation's peer set topped up to
/// [`MAX_NEIGHBOURS`] by asking live peers for their neighbours.
pub fn spawn_neighbour_sweep(
    directory: Arc<Directory>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(NEIGHBOUR_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            for file in directory.files().await {
                for generation in file.generations() {
                    top_up_generation(&directory, generation).await;
                }
            }
        }
    })
}

async fn top_up_generation(directory: &Arc<Directory>, generation: &Arc<Generation>) {
    generation.prune_dead_peers().await;

    let peers = generation.peers().await;
    if peers.len() >= MAX_NEIGHBOURS {
        return;
    }
    let mut needed = MAX_NEIGHBOURS - peers.len();

    for peer in peers.iter().filter(|p| p.is_on) {
        let fetched =
            match fetch_neighbours(&peer.addr, generation.info().hash, directory.port()).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    debug!(addr = %peer.addr, error = %e, "neighbour fetch failed");
                    continue;
                }
            };
        for addr in fetched {
            if is_self(directory, &addr) || peers.iter().any(|p| p.addr == addr) {
                continue;
            }
            generation.add_peer(&addr).await;
            needed = needed.saturating_sub(1);
            if needed == 0 {
                return;
            }
        }
    }
}

/// Reclaim encoders that have sat idle past their timeout.
pub fn spawn_encoder_sweep(
    directory: Arc<Directory>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ENCODER_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            directory.drop_idle_encoders().await;
        }
    })
}

/// Spawn all three sweeps.
pub fn spawn_sweeps(
    directory: &Arc<Directory>,
    shutdown: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_alive_sweep(Arc::clone(directory), shutdown.clone()),
        spawn_neighbour_sweep(Arc::clone(directory), shutdown.clone()),
        spawn_encoder_sweep(Arc::clone(directory), shutdown.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_detection() {
        let directory = Directory::new("192.168.1.5", 8080);
        assert!(is_self(&directory, "127.0.0.1:8080"));
        assert!(is_self(&directory, "192.168.1.5:8080"));
        assert!(!is_self(&directory, "127.0.0.1:9000"));
        assert!(!is_self(&directory, "10.0.0.7:8080"));
        // Unparseable addresses are foreign, never a failure.
        assert!(!is_self(&directory, "not-an-address"));
    }

    #[tokio::test]
    async fn is_alive_returns_false_for_unreachable_peer() {
        // Reserved port on localhost with nothing listening.
        assert!(!is_alive("127.0.0.1:1", 8080).await);
    }
}
