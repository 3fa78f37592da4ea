//! One shared file: an ordered list of generations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cascade_seed::{SeedError, SeedFile};

use crate::generation::{Generation, GenerationInfo};

/// A file the node is seeding, leeching, or both (per generation).
pub struct SharedFile {
    seed: SeedFile,
    /// Path of the `.nc` seed this file was added from.
    path: PathBuf,
    generations: Vec<Arc<Generation>>,
}

impl SharedFile {
    /// Load the seed at `path`, probe which generations already exist on
    /// disk, and build the generation list. Announce addresses become
    /// the initial peer set of every generation.
    ///
    /// Blocking: reads and hashes the payload. Call from a blocking
    /// context (the directory wraps this in `spawn_blocking`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref().to_path_buf();
        let seed = SeedFile::load(&path)?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let downloaded = seed.downloaded_generations(dir)?;
        let target_path = seed.target_path(&path);

        let mut announce: Vec<String> = Vec::new();
        if !seed.announce.is_empty() {
            announce.push(seed.announce.clone());
        }
        for addr in &seed.announce_list {
            if !announce.contains(addr) {
                announce.push(addr.clone());
            }
        }

        let generations = (0..seed.generation_count())
            .map(|serial| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(seed.generation_hash(serial));
                let info = GenerationInfo {
                    hash,
                    serial,
                    length: seed.generation_length(serial),
                    piece_count: seed.piece_count(serial),
                    target_path: target_path.clone(),
                };
                Generation::new(info, &announce, downloaded[serial])
            })
            .collect();

        Ok(SharedFile {
            seed,
            path,
            generations,
        })
    }

    pub fn seed(&self) -> &SeedFile {
        &self.seed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generations(&self) -> &[Arc<Generation>] {
        &self.generations
    }

    pub fn generation_by_hash(&self, hash: &[u8]) -> Option<&Arc<Generation>> {
        self.generations
            .iter()
            .find(|g| g.info().hash.as_slice() == hash)
    }

    /// Fraction of the whole file recovered: decoded bytes over total
    /// length.
    pub async fn process_rate(&self) -> f64 {
        let mut decoded = 0u64;
        for generation in &self.generations {
            decoded += generation.decoded_size().await;
        }
        decoded as f64 / self.seed.info.length as f64
    }

    pub async fn is_downloading(&self) -> bool {
        for generation in &self.generations {
            if generation.is_downloading().await {
                return true;
            }
        }
        false
    }

    pub async fn start_receiving_all(&self) {
        for generation in &self.generations {
            generation.start_receiving().await;
        }
    }

    pub async fn stop_receiving_all(&self) {
        for generation in &self.generations {
            generation.stop_receiving().await;
        }
    }

    /// Propagate a learned peer to every generation.
    pub async fn add_peer(&self, addr: &str) {
        for generation in &self.generations {
            generation.add_peer(addr).await;
        }
    }

    pub async fn delete_peer(&self, addr: &str) {
        for generation in &self.generations {
            generation.delete_peer(addr).await;
        }
    }

    pub async fn drop_idle_encoders(&self) {
        for generation in &self.generations {
            generation.drop_idle_encoder().await;
        }
    }
}
