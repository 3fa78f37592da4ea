//! RLNC encoders.
//!
//! All three variants hold the `k` original pieces of one generation and
//! emit coded pieces on demand:
//!
//! - [`FullRlncEncoder`] — dense random coding vector every time.
//! - [`SparseRlncEncoder`] — dense draw, then each coefficient is zeroed
//!   independently with a drop probability, trading decoding robustness
//!   for cheaper combination.
//! - [`SystematicRlncEncoder`] — the first `k` emissions carry the
//!   original pieces verbatim under unit vectors, then it behaves like
//!   the full encoder.

use rand::RngExt;

use crate::error::CoderError;
use crate::piece::{self, CodedPiece, Piece};

/// The minimum expected number of surviving coefficients for a sparse
/// draw; the drop probability is clamped so this many remain on average.
const MIN_EXPECTED_COEFFICIENTS: f64 = 6.0;

/// On-demand producer of coded pieces over one set of original pieces.
pub trait Encoder {
    /// Number of pieces coded together; a decoder needs this many
    /// linearly independent coded pieces.
    fn piece_count(&self) -> usize;

    /// Size of each original piece in bytes (padding included).
    fn piece_size(&self) -> usize;

    /// Wire length of one coded piece: `k + L`.
    fn coded_piece_len(&self) -> usize {
        self.piece_count() + self.piece_size()
    }

    /// Minimum byte count, as concatenated coded pieces, from which the
    /// originals can be reconstructed: `k · (k + L)`.
    fn decodable_len(&self) -> usize {
        self.piece_count() * self.coded_piece_len()
    }

    /// Zero bytes appended to the source data so the split is even.
    fn padding(&self) -> usize;

    /// Produce the next coded piece.
    fn coded_piece(&mut self) -> CodedPiece;
}

fn combine(pieces: &[Piece], vector: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; pieces[0].len()];
    for (piece, &coeff) in pieces.iter().zip(vector.iter()) {
        piece::multiply_accumulate(&mut payload, piece, coeff);
    }
    payload
}

// ─── Full RLNC ──────────────────────────────────────────────────────────────

/// Encoder drawing a dense uniform coding vector for every emission.
pub struct FullRlncEncoder {
    pieces: Vec<Piece>,
    padding: usize,
}

impl FullRlncEncoder {
    /// Code the given pieces together. All pieces must share one length.
    pub fn new(pieces: Vec<Piece>) -> Self {
        debug_assert!(!pieces.is_empty());
        FullRlncEncoder { pieces, padding: 0 }
    }

    /// Split `data` into `piece_count` pieces and build the encoder.
    pub fn with_piece_count(data: &[u8], piece_count: usize) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_count(data, piece_count)?;
        Ok(FullRlncEncoder { pieces, padding })
    }

    /// Split `data` into pieces of `piece_size` bytes and build the encoder.
    pub fn with_piece_size(data: &[u8], piece_size: usize) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_size(data, piece_size)?;
        Ok(FullRlncEncoder { pieces, padding })
    }
}

impl Encoder for FullRlncEncoder {
    fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    fn piece_size(&self) -> usize {
        self.pieces[0].len()
    }

    fn padding(&self) -> usize {
        self.padding
    }

    fn coded_piece(&mut self) -> CodedPiece {
        let vector = piece::gen_coding_vector(self.pieces.len());
        let payload = combine(&self.pieces, &vector);
        CodedPiece {
            vector,
            piece: payload,
        }
    }
}

// ─── Sparse RLNC ────────────────────────────────────────────────────────────

/// Encoder that zeroes each drawn coefficient with probability
/// `drop_probability`, keeping combination cost low for large `k`.
pub struct SparseRlncEncoder {
    pieces: Vec<Piece>,
    padding: usize,
    drop_probability: f64,
}

impl SparseRlncEncoder {
    pub fn new(pieces: Vec<Piece>, drop_probability: f64) -> Self {
        debug_assert!(!pieces.is_empty());
        SparseRlncEncoder {
            pieces,
            padding: 0,
            drop_probability,
        }
    }

    /// Split `data` into `piece_count` pieces and build the encoder.
    ///
    /// The drop probability is clamped to `1 − 6/k` so that, in
    /// expectation, at least six coefficients survive each draw.
    pub fn with_piece_count(
        data: &[u8],
        piece_count: usize,
        drop_probability: f64,
    ) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_count(data, piece_count)?;
        let ceiling = 1.0 - MIN_EXPECTED_COEFFICIENTS / piece_count as f64;
        Ok(SparseRlncEncoder {
            pieces,
            padding,
            drop_probability: drop_probability.min(ceiling),
        })
    }

    /// Split `data` into pieces of `piece_size` bytes and build the encoder.
    pub fn with_piece_size(
        data: &[u8],
        piece_size: usize,
        drop_probability: f64,
    ) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_size(data, piece_size)?;
        Ok(SparseRlncEncoder {
            pieces,
            padding,
            drop_probability,
        })
    }

    /// The drop probability actually in use, after clamping.
    pub fn drop_probability(&self) -> f64 {
        self.drop_probability
    }
}

impl Encoder for SparseRlncEncoder {
    fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    fn piece_size(&self) -> usize {
        self.pieces[0].len()
    }

    fn padding(&self) -> usize {
        self.padding
    }

    fn coded_piece(&mut self) -> CodedPiece {
        let mut vector = piece::gen_coding_vector(self.pieces.len());
        let mut rng = rand::rng();
        for coeff in &mut vector {
            if rng.random::<f64>() <= self.drop_probability {
                *coeff = 0;
            }
        }
        let payload = combine(&self.pieces, &vector);
        CodedPiece {
            vector,
            piece: payload,
        }
    }
}

// ─── Systematic RLNC ────────────────────────────────────────────────────────

/// Encoder whose first `k` emissions are the original pieces verbatim
/// (unit coding vectors, in order); later emissions are full RLNC.
pub struct SystematicRlncEncoder {
    pieces: Vec<Piece>,
    padding: usize,
    next_piece: usize,
}

impl SystematicRlncEncoder {
    pub fn new(pieces: Vec<Piece>) -> Self {
        debug_assert!(!pieces.is_empty());
        SystematicRlncEncoder {
            pieces,
            padding: 0,
            next_piece: 0,
        }
    }

    /// Split `data` into `piece_count` pieces and build the encoder.
    pub fn with_piece_count(data: &[u8], piece_count: usize) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_count(data, piece_count)?;
        Ok(SystematicRlncEncoder {
            pieces,
            padding,
            next_piece: 0,
        })
    }

    /// Split `data` into pieces of `piece_size` bytes and build the encoder.
    pub fn with_piece_size(data: &[u8], piece_size: usize) -> Result<Self, CoderError> {
        let (pieces, padding) = piece::split_by_size(data, piece_size)?;
        Ok(SystematicRlncEncoder {
            pieces,
            padding,
            next_piece: 0,
        })
    }
}

impl Encoder for SystematicRlncEncoder {
    fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    fn piece_size(&self) -> usize {
        self.pieces[0].len()
    }

    fn padding(&self) -> usize {
        self.padding
    }

    fn coded_piece(&mut self) -> CodedPiece {
        if self.next_piece < self.pieces.len() {
            let idx = self.next_piece;
            self.next_piece += 1;
            let mut vector = vec![0u8; self.pieces.len()];
            vector[idx] = 1;
            return CodedPiece {
                vector,
                piece: self.pieces[idx].clone(),
            };
        }
        let vector = piece::gen_coding_vector(self.pieces.len());
        let payload = combine(&self.pieces, &vector);
        CodedPiece {
            vector,
            piece: payload,
        }
    }
}
