//! Re-randomizing forwarder.
//!
//! A peer that has coded pieces but has not decoded yet can still help
//! the swarm: it draws a fresh random combination *of the combinations it
//! holds* and maps the result back into the original basis, so a
//! downstream decoder cannot tell a recoded piece from an encoder's
//! output.

use crate::error::CoderError;
use crate::matrix::Matrix;
use crate::piece::{self, CodedPiece};

/// Full-RLNC recoder over the coded pieces of one generation.
pub struct FullRlncRecoder {
    pieces: Vec<CodedPiece>,
    /// Rows are the held pieces' coding vectors, in the original basis.
    coding_matrix: Matrix,
}

impl FullRlncRecoder {
    /// Recode over the given pieces. Must not be empty.
    pub fn new(pieces: Vec<CodedPiece>) -> Self {
        debug_assert!(!pieces.is_empty());
        let coding_matrix =
            Matrix::from_rows(pieces.iter().map(|cp| cp.vector.clone()).collect());
        FullRlncRecoder {
            pieces,
            coding_matrix,
        }
    }

    /// Rebuild the pieces from their concatenated flattened form and
    /// recode over them.
    pub fn from_flat(
        data: &[u8],
        piece_count: usize,
        coded_together: usize,
    ) -> Result<Self, CoderError> {
        let pieces = piece::coded_pieces_from_flat(data, piece_count, coded_together)?;
        Ok(FullRlncRecoder::new(pieces))
    }

    /// Number of coded pieces held.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Take one more coded piece into the mix.
    pub fn add_coded_piece(&mut self, coded_piece: CodedPiece) {
        self.coding_matrix.push_row(coded_piece.vector.clone());
        self.pieces.push(coded_piece);
    }

    /// Emit a fresh combination of the held pieces.
    ///
    /// The draw `w` ranges over the held pieces; the emitted coding
    /// vector is `w · M`, i.e. already expressed in the original basis.
    pub fn coded_piece(&mut self) -> Result<CodedPiece, CoderError> {
        let weights = piece::gen_coding_vector(self.pieces.len());

        let mut payload = vec![0u8; self.pieces[0].piece.len()];
        for (cp, &w) in self.pieces.iter().zip(weights.iter()) {
            piece::multiply_accumulate(&mut payload, &cp.piece, w);
        }

        let mapped = Matrix::from_rows(vec![weights]).mul(&self.coding_matrix)?;
        let vector = mapped.into_rows().pop().expect("one-row product");

        Ok(CodedPiece {
            vector,
            piece: payload,
        })
    }
}
