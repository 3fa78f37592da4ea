//! Pieces, coded pieces, and the splitter.
//!
//! A piece is a fixed-length run of field elements. A coded piece pairs a
//! coding vector `v` (length `k`, one coefficient per original piece) with
//! the payload `p = Σ v_i · piece_i` (length `L`). On the wire the two are
//! flattened to `v ‖ p`.

use rand::Rng;

use crate::error::CoderError;
use crate::gf256;

/// One fragment of a generation's payload.
pub type Piece = Vec<u8>;

/// `dst += coeff · src`, element-wise over GF(256).
///
/// The accumulation kernel shared by every encoder and the recoder.
#[inline]
pub fn multiply_accumulate(dst: &mut [u8], src: &[u8], coeff: u8) {
    if coeff == 0 {
        return;
    }
    debug_assert_eq!(dst.len(), src.len());
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = gf256::add(*d, gf256::mul(s, coeff));
    }
}

/// Draw `len` coding coefficients uniformly from the field.
pub fn gen_coding_vector(len: usize) -> Vec<u8> {
    let mut vector = vec![0u8; len];
    rand::rng().fill_bytes(&mut vector);
    vector
}

// ─── CodedPiece ─────────────────────────────────────────────────────────────

/// A random linear combination of a generation's pieces, tagged with the
/// coding vector that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedPiece {
    /// Coding vector in the original basis; length = piece count `k`.
    pub vector: Vec<u8>,
    /// The combined payload; length = piece size `L`.
    pub piece: Vec<u8>,
}

impl CodedPiece {
    /// Wire length: `k + L`.
    pub fn len(&self) -> usize {
        self.vector.len() + self.piece.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty() && self.piece.is_empty()
    }

    /// `v ‖ p` as one buffer.
    pub fn flatten(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.len());
        flat.extend_from_slice(&self.vector);
        flat.extend_from_slice(&self.piece);
        flat
    }

    /// A coded piece is systematic iff its vector selects exactly one
    /// original piece with coefficient 1.
    pub fn is_systematic(&self) -> bool {
        let mut ones = 0usize;
        for &c in &self.vector {
            match c {
                0 => {}
                1 => ones += 1,
                _ => return false,
            }
        }
        ones == 1
    }
}

// ─── Splitter ───────────────────────────────────────────────────────────────

/// Split `data` into exactly `count` equal-size pieces, zero-padding the
/// tail. Returns the pieces and the number of padding bytes appended.
pub fn split_by_count(data: &[u8], count: usize) -> Result<(Vec<Piece>, usize), CoderError> {
    if count == 0 {
        return Err(CoderError::BadPieceCount);
    }
    if count > data.len() {
        return Err(CoderError::PieceCountMoreThanTotalBytes);
    }
    let piece_size = data.len().div_ceil(count);
    Ok(split(data, count, piece_size))
}

/// Split `data` into pieces of exactly `piece_size` bytes each,
/// zero-padding the tail. A piece size that leaves fewer than two pieces
/// is rejected.
pub fn split_by_size(data: &[u8], piece_size: usize) -> Result<(Vec<Piece>, usize), CoderError> {
    if piece_size == 0 {
        return Err(CoderError::ZeroPieceSize);
    }
    if piece_size >= data.len() {
        return Err(CoderError::BadPieceCount);
    }
    let count = data.len().div_ceil(piece_size);
    Ok(split(data, count, piece_size))
}

fn split(data: &[u8], count: usize, piece_size: usize) -> (Vec<Piece>, usize) {
    let padding = count * piece_size - data.len();
    let mut pieces = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * piece_size;
        let end = data.len().min(start + piece_size);
        let mut piece = vec![0u8; piece_size];
        if start < end {
            piece[..end - start].copy_from_slice(&data[start..end]);
        }
        pieces.push(piece);
    }
    (pieces, padding)
}

// ─── Flatten parser ─────────────────────────────────────────────────────────

/// Rebuild `piece_count` coded pieces from their concatenated flattened
/// form, where each carries a coding vector of `coded_together` elements.
pub fn coded_pieces_from_flat(
    data: &[u8],
    piece_count: usize,
    coded_together: usize,
) -> Result<Vec<CodedPiece>, CoderError> {
    if piece_count == 0 || data.len() % piece_count != 0 {
        return Err(CoderError::CodedDataLengthMismatch);
    }
    let coded_piece_len = data.len() / piece_count;
    if coded_together >= coded_piece_len {
        return Err(CoderError::CodingVectorLengthMismatch);
    }
    let pieces = data
        .chunks_exact(coded_piece_len)
        .map(|chunk| CodedPiece {
            vector: chunk[..coded_together].to_vec(),
            piece: chunk[coded_together..].to_vec(),
        })
        .collect();
    Ok(pieces)
}
