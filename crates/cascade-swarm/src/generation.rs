//! Per-generation lifecycle.
//!
//! A generation moves through three roles:
//!
//! ```text
//!   Seeding ──▶ (encoder, lazily built from the on-disk slab)
//!   Receiving ─▶ (decoder + recoder fed by the ingestion task)
//!   Complete ──▶ slab persisted, roles dropped, back to Seeding
//! ```
//!
//! All role state lives behind one async mutex, so the "single logical
//! writer" exclusion is structural: the ingestion task and the
//! request-handling tasks serialize on it. Inbound coded pieces flow
//! through a bounded channel; when the decoder falls behind, protocol
//! readers block on `send` and the connection naturally throttles.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cascade_coder::encoder::Encoder;
use cascade_coder::{CodedPiece, CoderError, FullRlncRecoder, GaussElimDecoder, SparseRlncEncoder};
use cascade_seed::GENERATION_SIZE;

use crate::peer::Peer;

/// Capacity of the inbound coded-piece queue. Full queue = backpressure
/// onto the protocol readers.
pub const INBOUND_CAPACITY: usize = 10;

/// An encoder untouched for this long is reclaimed by the periodic sweep.
pub const ENCODER_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Coefficient drop probability used when serving from the slab.
pub const SERVE_DROP_PROBABILITY: f64 = 0.95;

/// Backoff between retries when the target file is transiently locked.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Immutable view of the owning file's metadata, captured at
/// construction so the generation never needs a back-pointer.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
    /// SHA-1 of the plaintext slab.
    pub hash: [u8; 20],
    /// Index of this generation within the file.
    pub serial: usize,
    /// True byte length of the slab (≤ 128 MiB).
    pub length: u64,
    /// Number of pieces coded together.
    pub piece_count: usize,
    /// Where the plaintext file lives (shared by all generations).
    pub target_path: PathBuf,
}

/// Role state: exactly one writer at a time mutates it.
struct Roles {
    downloaded: bool,
    downloading: bool,
    decoder: Option<GaussElimDecoder>,
    recoder: Option<FullRlncRecoder>,
    encoder: Option<SparseRlncEncoder>,
    encoder_last_used: Instant,
    inbound: Option<mpsc::Sender<CodedPiece>>,
    cancel: CancellationToken,
}

/// One 128 MiB block of a shared file and everything needed to serve or
/// acquire it.
pub struct Generation {
    info: GenerationInfo,
    roles: Mutex<Roles>,
    peers: RwLock<Vec<Peer>>,
    /// Cancellation handles of the piece-stream connections feeding us.
    connections: Mutex<Vec<CancellationToken>>,
}

impl Generation {
    /// Build a generation, seeding its peer list from the announce
    /// addresses. `downloaded` reflects the on-disk probe.
    pub fn new(info: GenerationInfo, announce: &[String], downloaded: bool) -> Arc<Self> {
        let peers = announce.iter().map(Peer::new).collect();
        Arc::new(Generation {
            info,
            roles: Mutex::new(Roles {
                downloaded,
                downloading: false,
                decoder: None,
                recoder: None,
                encoder: None,
                encoder_last_used: Instant::now(),
                inbound: None,
                cancel: CancellationToken::new(),
            }),
            peers: RwLock::new(peers),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn info(&self) -> &GenerationInfo {
        &self.info
    }

    pub async fn is_downloaded(&self) -> bool {
        self.roles.lock().await.downloaded
    }

    pub async fn is_downloading(&self) -> bool {
        self.roles.lock().await.downloading
    }

    // ─── Receive side ───────────────────────────────────────────────────

    /// Enter the receiving state: allocate the decoder and the bounded
    /// inbound queue, and spawn the ingestion task. No-op if already
    /// downloading or downloaded.
    pub async fn start_receiving(self: &Arc<Self>) {
        let (mut rx, cancel) = {
            let mut roles = self.roles.lock().await;
            if roles.downloading || roles.downloaded {
                return;
            }
            roles.downloading = true;
            roles.decoder = Some(GaussElimDecoder::new(self.info.piece_count));
            let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
            roles.inbound = Some(tx);
            let cancel = CancellationToken::new();
            roles.cancel = cancel.clone();
            (rx, cancel)
        };
        debug!(hash = %hex::encode(self.info.hash), "start receiving");

        let generation = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => {
                        let Some(coded_piece) = received else { break };
                        generation.add_coded_piece(coded_piece).await;
                        if generation.is_downloaded().await {
                            let generation = Arc::clone(&generation);
                            tokio::spawn(async move { generation.stop_receiving().await });
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Leave the receiving state: close the feeding connections, clear
    /// the peers' client flags, cancel the ingestion task, drop the
    /// inbound queue. No-op unless downloading.
    pub async fn stop_receiving(&self) {
        let cancel = {
            let mut roles = self.roles.lock().await;
            if !roles.downloading {
                return;
            }
            roles.downloading = false;
            roles.inbound = None;
            roles.cancel.clone()
        };

        let mut connections = self.connections.lock().await;
        for connection in connections.drain(..) {
            connection.cancel();
        }
        drop(connections);

        let mut peers = self.peers.write().await;
        for peer in peers.iter_mut() {
            peer.have_client = false;
        }
        drop(peers);

        cancel.cancel();
        debug!(hash = %hex::encode(self.info.hash), "stopped receiving");
    }

    /// The inbound queue, while receiving. Protocol readers clone the
    /// sender and block on it when the decoder is saturated.
    pub async fn inbound(&self) -> Option<mpsc::Sender<CodedPiece>> {
        self.roles.lock().await.inbound.clone()
    }

    /// Feed one coded piece to the decoder and mirror it into the
    /// recoder. On reaching full rank the slab is persisted, both roles
    /// are released, and the generation flips to the seed side.
    pub async fn add_coded_piece(&self, coded_piece: CodedPiece) {
        let mut roles = self.roles.lock().await;
        if roles.downloaded {
            return;
        }
        if coded_piece.vector.len() != self.info.piece_count {
            warn!(
                hash = %hex::encode(self.info.hash),
                got = coded_piece.vector.len(),
                want = self.info.piece_count,
                "dropping coded piece with wrong vector length"
            );
            return;
        }

        let decoder = roles
            .decoder
            .get_or_insert_with(|| GaussElimDecoder::new(self.info.piece_count));
        let expected_size = decoder.piece_size();
        if expected_size != 0 && coded_piece.piece.len() != expected_size {
            warn!(
                hash = %hex::encode(self.info.hash),
                got = coded_piece.piece.len(),
                want = expected_size,
                "dropping coded piece with wrong payload length"
            );
            return;
        }
        match decoder.add_piece(coded_piece.clone()) {
            Ok(()) => {}
            Err(CoderError::AllUsefulPiecesReceived) => {
                debug!(hash = %hex::encode(self.info.hash), "redundant piece after full rank");
            }
            Err(e) => warn!(hash = %hex::encode(self.info.hash), error = %e, "decoder rejected piece"),
        }

        match roles.recoder.as_mut() {
            Some(recoder) => recoder.add_coded_piece(coded_piece),
            None => roles.recoder = Some(FullRlncRecoder::new(vec![coded_piece])),
        }

        let decoded = roles.decoder.as_ref().is_some_and(|d| d.is_decoded());
        if decoded {
            let decoder = roles.decoder.take().expect("decoder present at full rank");
            let cancel = roles.cancel.clone();
            match self.persist(&decoder, &cancel).await {
                Ok(()) => {
                    roles.recoder = None;
                    roles.downloaded = true;
                    info!(hash = %hex::encode(self.info.hash), "generation downloaded");
                }
                Err(e) => {
                    // Keep the solved system so a later piece retriggers
                    // the persist attempt.
                    warn!(hash = %hex::encode(self.info.hash), error = %e, "persist failed");
                    roles.decoder = Some(decoder);
                }
            }
        }
    }

    /// Write the decoded slab into the target file at this generation's
    /// offset. Only the final piece is truncated to the slab's true
    /// length; the file is always flushed and closed. Transient open
    /// failures (sharing violations from a concurrent persist) are
    /// retried every 100 ms until cancelled.
    async fn persist(
        &self,
        decoder: &GaussElimDecoder,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let pieces = decoder.get_pieces()?;

        let mut file = loop {
            match tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&self.info.target_path)
                .await
            {
                Ok(file) => break file,
                Err(e) => {
                    debug!(
                        path = %self.info.target_path.display(),
                        error = %e,
                        "target file not writable yet, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => anyhow::bail!("cancelled while opening target file"),
                        _ = tokio::time::sleep(PERSIST_RETRY_DELAY) => {}
                    }
                }
            }
        };

        file.seek(SeekFrom::Start(self.info.serial as u64 * GENERATION_SIZE))
            .await?;
        let mut remaining = self.info.length as usize;
        for piece in &pieces {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(piece.len());
            file.write_all(&piece[..take]).await?;
            remaining -= take;
        }
        file.flush().await?;
        Ok(())
    }

    // ─── Serve side ─────────────────────────────────────────────────────

    /// Produce one coded piece for a remote peer.
    ///
    /// While receiving, the recoder forwards a fresh combination of what
    /// has arrived so far. Once downloaded, a sparse encoder over the
    /// on-disk slab is built lazily and reused until the idle sweep
    /// reclaims it.
    pub async fn get_coded_piece(&self) -> Option<CodedPiece> {
        let mut roles = self.roles.lock().await;

        if let Some(recoder) = roles.recoder.as_mut() {
            return match recoder.coded_piece() {
                Ok(coded_piece) => Some(coded_piece),
                Err(e) => {
                    warn!(hash = %hex::encode(self.info.hash), error = %e, "recoder failed");
                    None
                }
            };
        }

        if !roles.downloaded {
            return None;
        }
        roles.encoder_last_used = Instant::now();

        if roles.encoder.is_none() {
            let slab = match self.read_slab().await {
                Ok(slab) => slab,
                Err(e) => {
                    warn!(
                        hash = %hex::encode(self.info.hash),
                        error = %e,
                        "cannot load slab for encoding"
                    );
                    return None;
                }
            };
            match SparseRlncEncoder::with_piece_count(
                &slab,
                self.info.piece_count,
                SERVE_DROP_PROBABILITY,
            ) {
                Ok(encoder) => roles.encoder = Some(encoder),
                Err(e) => {
                    warn!(hash = %hex::encode(self.info.hash), error = %e, "cannot build encoder");
                    return None;
                }
            }
        }

        roles.encoder.as_mut().map(|encoder| encoder.coded_piece())
    }

    async fn read_slab(&self) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.info.target_path).await?;
        file.seek(SeekFrom::Start(self.info.serial as u64 * GENERATION_SIZE))
            .await?;
        let mut slab = vec![0u8; self.info.length as usize];
        file.read_exact(&mut slab).await?;
        Ok(slab)
    }

    /// Reclaim the encoder (and the slab memory behind it) once it has
    /// sat idle past [`ENCODER_IDLE_TIMEOUT`]. Called by the periodic
    /// sweep; an encoder mid-emission is protected by the role lock.
    pub async fn drop_idle_encoder(&self) {
        let mut roles = self.roles.lock().await;
        if roles.encoder.is_some() && roles.encoder_last_used.elapsed() > ENCODER_IDLE_TIMEOUT {
            roles.encoder = None;
            debug!(hash = %hex::encode(self.info.hash), "idle encoder dropped");
        }
    }

    // ─── Progress ───────────────────────────────────────────────────────

    /// Bytes of this generation considered recovered.
    pub async fn decoded_size(&self) -> u64 {
        let roles = self.roles.lock().await;
        if roles.downloaded {
            return self.info.length;
        }
        match roles.decoder.as_ref() {
            Some(decoder) => (decoder.process_rate() * self.info.length as f64) as u64,
            None => 0,
        }
    }

    /// Fraction of this generation recovered, in `[0, 1]`.
    pub async fn process_rate(&self) -> f64 {
        let roles = self.roles.lock().await;
        if roles.downloaded {
            return 1.0;
        }
        roles
            .decoder
            .as_ref()
            .map(|d| d.process_rate())
            .unwrap_or(0.0)
    }

    // ─── Peers & connections ────────────────────────────────────────────

    /// Learn a peer, ignoring duplicates.
    pub async fn add_peer(&self, addr: &str) {
        let mut peers = self.peers.write().await;
        if peers.iter().any(|p| p.addr == addr) {
            return;
        }
        peers.push(Peer::new(addr));
    }

    pub async fn delete_peer(&self, addr: &str) {
        self.peers.write().await.retain(|p| p.addr != addr);
    }

    /// Snapshot of the peer set.
    pub async fn peers(&self) -> Vec<Peer> {
        self.peers.read().await.clone()
    }

    pub async fn update_peer_status(&self, addr: &str, is_on: bool) {
        let mut peers = self.peers.write().await;
        for peer in peers.iter_mut() {
            if peer.addr == addr {
                peer.is_on = is_on;
            }
        }
    }

    pub async fn set_peer_client(&self, addr: &str, have_client: bool) {
        let mut peers = self.peers.write().await;
        for peer in peers.iter_mut() {
            if peer.addr == addr {
                peer.have_client = have_client;
            }
        }
    }

    /// Drop peers that are both off and clientless; the neighbour sweep
    /// calls this before topping the set back up.
    pub async fn prune_dead_peers(&self) {
        self.peers
            .write()
            .await
            .retain(|p| p.is_on || p.have_client);
    }

    /// Track a piece-stream connection so `stop_receiving` can close it.
    pub async fn register_connection(&self, cancel: CancellationToken) {
        self.connections.lock().await.push(cancel);
    }
}
