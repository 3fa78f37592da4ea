//! # cascade-seed
//!
//! The `.nc` seed container and the geometry of a shared file.
//!
//! A seed file is a bencoded dictionary describing one payload file:
//! tracker endpoints, free-text metadata, and an `info` dictionary with
//! the payload name, its byte length, and one SHA-1 hash per 128 MiB
//! **generation**. The payload itself lives beside the seed with the
//! `.nc` extension stripped; generation `i` occupies bytes
//! `[i·2^27, min((i+1)·2^27, length))`.
//!
//! Only the per-generation hash list is a valid `info.hash`; the legacy
//! single-hash shape fails deserialization and is reported as a bencode
//! error.

mod hash;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

pub use hash::{generation_hashes, GENERATION_SIZE, PIECE_SIZE};

/// SHA-1 digest length, bytes.
pub const HASH_LEN: usize = 20;

/// Extension carried by seed files.
pub const SEED_EXTENSION: &str = "nc";

/// Errors raised while loading, probing or creating seeds.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error("seed describes an empty file")]
    EmptyFile,

    #[error("generation hash is not {HASH_LEN} bytes")]
    InvalidHash,

    #[error("existing file length does not match the seed")]
    LengthMismatch,

    #[error("generation hash count does not match the seed")]
    HashCountMismatch,

    #[error("directories are not supported")]
    DirectoryUnsupported,
}

/// The `info` dictionary: payload identity and generation hashes.
///
/// Field order matters: bencode dictionaries are sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedInfo {
    /// One 20-byte SHA-1 per generation, in order.
    pub hash: Vec<ByteBuf>,
    /// Payload length in bytes.
    pub length: i64,
    /// Payload file name.
    pub name: String,
}

/// A parsed `.nc` seed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    pub announce: String,
    #[serde(rename = "announce-list", default)]
    pub announce_list: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "created by", default)]
    pub created_by: String,
    /// Unix seconds.
    #[serde(rename = "creation date", default)]
    pub creation_date: i64,
    pub info: SeedInfo,
}

impl SeedFile {
    /// Parse a seed from its bencoded form.
    ///
    /// Empty strings are filtered out of `announce-list`, and every
    /// generation hash must be exactly 20 bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, SeedError> {
        let mut seed: SeedFile = serde_bencode::from_bytes(raw)?;
        seed.announce_list.retain(|a| !a.is_empty());
        if seed.info.hash.iter().any(|h| h.len() != HASH_LEN) {
            return Err(SeedError::InvalidHash);
        }
        Ok(seed)
    }

    /// Read and parse a seed file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let raw = fs::read(path)?;
        SeedFile::from_bytes(&raw)
    }

    /// Bencode the seed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SeedError> {
        Ok(serde_bencode::to_bytes(self)?)
    }

    /// Write the bencoded seed to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SeedError> {
        let mut file = fs::File::create(path)?;
        file.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Build a seed for the payload at `path` and write it beside the
    /// payload as `<name>.nc`. Returns the seed and the path it was
    /// written to.
    pub fn create(
        path: impl AsRef<Path>,
        comment: &str,
        announce: &str,
        announce_list: &[String],
    ) -> Result<(Self, PathBuf), SeedError> {
        let path = path.as_ref();
        let meta = fs::metadata(path)?;
        if meta.is_dir() {
            return Err(SeedError::DirectoryUnsupported);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hashes = generation_hashes(path)?;

        let seed = SeedFile {
            announce: announce.to_string(),
            announce_list: announce_list
                .iter()
                .filter(|a| !a.is_empty())
                .cloned()
                .collect(),
            comment: comment.to_string(),
            created_by: format!("cascade {}", env!("CARGO_PKG_VERSION")),
            creation_date: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            info: SeedInfo {
                hash: hashes.into_iter().map(|h| ByteBuf::from(h.to_vec())).collect(),
                length: meta.len() as i64,
                name,
            },
        };

        let seed_path = path.with_file_name(format!("{}.{SEED_EXTENSION}", seed.info.name));
        seed.save(&seed_path)?;
        Ok((seed, seed_path))
    }

    // ─── Geometry ───────────────────────────────────────────────────────

    /// Number of generations described by the seed.
    pub fn generation_count(&self) -> usize {
        self.info.hash.len()
    }

    /// The 20-byte hash of generation `serial`.
    pub fn generation_hash(&self, serial: usize) -> &[u8] {
        &self.info.hash[serial]
    }

    /// Byte length of generation `serial`:
    /// `min((serial + 1)·2^27, length) − serial·2^27`.
    pub fn generation_length(&self, serial: usize) -> u64 {
        let length = self.info.length as u64;
        let start = serial as u64 * GENERATION_SIZE;
        let end = length.min(start + GENERATION_SIZE);
        end.saturating_sub(start)
    }

    /// Piece count of generation `serial`: `ceil(len / 1 MiB)`.
    pub fn piece_count(&self, serial: usize) -> usize {
        self.generation_length(serial).div_ceil(PIECE_SIZE) as usize
    }

    /// Where the payload lives for a seed stored at `seed_path`: the
    /// same path with the `.nc` extension stripped.
    pub fn target_path(&self, seed_path: impl AsRef<Path>) -> PathBuf {
        seed_path.as_ref().with_extension("")
    }

    /// Probe which generations of the payload already exist in `dir`,
    /// by per-generation hash comparison against `info.hash`.
    ///
    /// An absent payload means nothing is downloaded; a payload of the
    /// wrong size, or one yielding a different number of generations,
    /// is an error.
    pub fn downloaded_generations(&self, dir: impl AsRef<Path>) -> Result<Vec<bool>, SeedError> {
        if self.info.length == 0 {
            return Err(SeedError::EmptyFile);
        }
        let count = self.generation_count();
        let payload = dir.as_ref().join(&self.info.name);

        let meta = match fs::metadata(&payload) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(vec![false; count]);
            }
            Err(e) => return Err(e.into()),
        };
        if meta.len() != self.info.length as u64 {
            return Err(SeedError::LengthMismatch);
        }

        let hashes = generation_hashes(&payload)?;
        if hashes.len() != count {
            return Err(SeedError::HashCountMismatch);
        }
        Ok(self
            .info
            .hash
            .iter()
            .zip(hashes.iter())
            .map(|(expected, actual)| expected.as_slice() == actual.as_slice())
            .collect())
    }
}
