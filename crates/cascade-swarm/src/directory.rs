//! Process-wide registry of files, generations and peers.
//!
//! One `Directory` is constructed at startup and passed explicitly to
//! the server, client and sweeps; there are no ambient globals. Lookups
//! are read-mostly and sit behind a reader/writer lock over the file
//! list; per-generation state has its own locks underneath.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;

use cascade_coder::CodedPiece;

use crate::file::SharedFile;
use crate::generation::Generation;
use crate::peer::Peer;

/// Neighbour-list replies carry at most this many peers.
pub const MAX_NEIGHBOURS: usize = 10;

/// The node's view of everything it shares and everyone it knows.
pub struct Directory {
    files: RwLock<Vec<Arc<SharedFile>>>,
    host: String,
    port: u16,
}

impl Directory {
    pub fn new(host: impl Into<String>, port: u16) -> Arc<Self> {
        Arc::new(Directory {
            files: RwLock::new(Vec::new()),
            host: host.into(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` the server binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // ─── File registry ──────────────────────────────────────────────────

    /// Load the seed at `path` and register the file. Rejects a path
    /// that is already registered. Seed parsing and the on-disk probe
    /// run on the blocking pool.
    pub async fn add_file(&self, path: impl Into<PathBuf>) -> anyhow::Result<Arc<SharedFile>> {
        let path = path.into();
        if self.file_by_path(&path).await.is_some() {
            anyhow::bail!("file already added: {}", path.display());
        }
        let opened = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || SharedFile::open(path))
                .await
                .context("seed loading task failed")??
        };
        let file = Arc::new(opened);
        self.files.write().await.push(Arc::clone(&file));
        Ok(file)
    }

    /// Stop all receiving on the file and unregister it.
    pub async fn remove_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let removed = {
            let mut files = self.files.write().await;
            match files.iter().position(|f| f.path() == path) {
                Some(idx) => Some(files.remove(idx)),
                None => None,
            }
        };
        if let Some(file) = removed {
            file.stop_receiving_all().await;
        }
    }

    pub async fn file_by_path(&self, path: impl AsRef<Path>) -> Option<Arc<SharedFile>> {
        let path = path.as_ref();
        self.files
            .read()
            .await
            .iter()
            .find(|f| f.path() == path)
            .cloned()
    }

    /// Snapshot of every registered file.
    pub async fn files(&self) -> Vec<Arc<SharedFile>> {
        self.files.read().await.clone()
    }

    // ─── Generation lookups ─────────────────────────────────────────────

    pub async fn generation(&self, hash: &[u8]) -> Option<Arc<Generation>> {
        let files = self.files.read().await;
        for file in files.iter() {
            if let Some(generation) = file.generation_by_hash(hash) {
                return Some(Arc::clone(generation));
            }
        }
        None
    }

    pub async fn is_generation_known(&self, hash: &[u8]) -> bool {
        self.generation(hash).await.is_some()
    }

    /// One coded piece for the given generation, if it is known and has
    /// anything to give.
    pub async fn coded_piece_for(&self, hash: &[u8]) -> Option<CodedPiece> {
        let generation = self.generation(hash).await?;
        generation.get_coded_piece().await
    }

    /// Up to [`MAX_NEIGHBOURS`] known peers, preferring those attached
    /// to the requested generation, then filling up from the rest.
    pub async fn neighbours(&self, hash: &[u8]) -> Vec<Peer> {
        let files = self.files.read().await;
        let mut neighbours: Vec<Peer> = Vec::new();

        let take = |peers: Vec<Peer>, neighbours: &mut Vec<Peer>| {
            for peer in peers {
                if neighbours.len() >= MAX_NEIGHBOURS {
                    return true;
                }
                if !neighbours.iter().any(|n| n.addr == peer.addr) {
                    neighbours.push(peer);
                }
            }
            false
        };

        for file in files.iter() {
            for generation in file.generations() {
                if generation.info().hash.as_slice() == hash
                    && take(generation.peers().await, &mut neighbours)
                {
                    return neighbours;
                }
            }
        }
        for file in files.iter() {
            for generation in file.generations() {
                if generation.info().hash.as_slice() != hash
                    && take(generation.peers().await, &mut neighbours)
                {
                    return neighbours;
                }
            }
        }
        neighbours
    }

    // ─── Peer registry ──────────────────────────────────────────────────

    /// Every known peer, deduped by address. A peer reported on by any
    /// generation counts as on.
    pub async fn peer_status_list(&self) -> Vec<Peer> {
        let files = self.files.read().await;
        let mut deduped: Vec<Peer> = Vec::new();
        for file in files.iter() {
            for generation in file.generations() {
                for peer in generation.peers().await {
                    match deduped.iter_mut().find(|p| p.addr == peer.addr) {
                        Some(existing) => existing.is_on |= peer.is_on,
                        None => deduped.push(peer),
                    }
                }
            }
        }
        deduped
    }

    /// Record an alive-check verdict everywhere the peer appears.
    pub async fn update_peer_status(&self, addr: &str, is_on: bool) {
        let files = self.files.read().await;
        for file in files.iter() {
            for generation in file.generations() {
                generation.update_peer_status(addr, is_on).await;
            }
        }
    }

    /// Learn a peer on every generation of every file.
    pub async fn add_peer(&self, addr: &str) {
        let files = self.files.read().await;
        for file in files.iter() {
            file.add_peer(addr).await;
        }
    }

    pub async fn delete_peer(&self, addr: &str) {
        let files = self.files.read().await;
        for file in files.iter() {
            file.delete_peer(addr).await;
        }
    }

    /// Reclaim idle encoders everywhere; driven by the periodic sweep.
    pub async fn drop_idle_encoders(&self) {
        let files = self.files.read().await;
        for file in files.iter() {
            file.drop_idle_encoders().await;
        }
    }
}
