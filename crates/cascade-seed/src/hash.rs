//! Per-generation SHA-1 hashing of a payload file.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

/// Generation size: 128 MiB.
pub const GENERATION_SIZE: u64 = 1 << 27;

/// Piece size within a generation: 1 MiB (the final piece of the final
/// generation may be shorter).
pub const PIECE_SIZE: u64 = 1 << 20;

/// Read buffer for hashing; small enough to keep resident memory flat
/// while hashing multi-gigabyte payloads.
const READ_CHUNK: usize = 1 << 20;

/// SHA-1 of every 128 MiB generation of the file at `path`, in order.
///
/// The final generation covers whatever remains and may be shorter.
/// Reads are looped until each generation boundary is reached, so short
/// reads from the OS never skew the chunking.
pub fn generation_hashes(path: impl AsRef<Path>) -> std::io::Result<Vec<[u8; 20]>> {
    let mut file = fs::File::open(path)?;
    let mut hashes = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    'outer: loop {
        let mut hasher = Sha1::new();
        let mut hashed: u64 = 0;
        while hashed < GENERATION_SIZE {
            let want = buf.len().min((GENERATION_SIZE - hashed) as usize);
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                if hashed > 0 {
                    hashes.push(hasher.finalize().into());
                }
                break 'outer;
            }
            hasher.update(&buf[..n]);
            hashed += n as u64;
        }
        hashes.push(hasher.finalize().into());
    }

    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn single_generation_hash_matches_whole_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::File::create(&path).unwrap().write_all(&data).unwrap();

        let hashes = generation_hashes(&path).unwrap();
        assert_eq!(hashes.len(), 1);

        let expected: [u8; 20] = Sha1::digest(&data).into();
        assert_eq!(hashes[0], expected);
    }

    #[test]
    fn empty_file_has_no_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::File::create(&path).unwrap();
        assert!(generation_hashes(&path).unwrap().is_empty());
    }
}
