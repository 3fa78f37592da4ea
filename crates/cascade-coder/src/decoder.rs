//! Incremental Gauss-Jordan decoder.
//!
//! The decoder maintains the augmented system `(C | D)`: row `i` couples
//! the coding vector of the `i`-th accepted piece with its payload. Both
//! halves live in one [`DecoderRow`], so a row swap is a single
//! `Vec::swap` and the two matrices can never desynchronize.
//!
//! Each candidate piece is probed for linear independence on a
//! coefficient-only scratch copy before it is allowed to touch `(C | D)`;
//! a dependent row is dropped without disturbing the reduced state. After
//! every accepted row the system is re-reduced to reduced row echelon
//! form, so `rank = rows` holds between calls and decoded pieces become
//! readable as soon as their row collapses to a unit vector.

use crate::error::CoderError;
use crate::gf256;
use crate::matrix::Matrix;
use crate::piece::{CodedPiece, Piece};

/// One row of the augmented system: coding vector plus payload.
#[derive(Debug, Clone)]
struct DecoderRow {
    coeffs: Vec<u8>,
    data: Vec<u8>,
}

/// `row_dst += q · row_src` on both halves, coefficients starting at
/// column `from`, payload in full.
fn add_scaled(rows: &mut [DecoderRow], dst: usize, src: usize, q: u8, from: usize) {
    if q == 0 || dst == src {
        return;
    }
    let (src_row, dst_row): (&DecoderRow, &mut DecoderRow) = if src < dst {
        let (head, tail) = rows.split_at_mut(dst);
        (&head[src], &mut tail[0])
    } else {
        let (head, tail) = rows.split_at_mut(src);
        (&tail[0], &mut head[dst])
    };
    for k in from..src_row.coeffs.len() {
        dst_row.coeffs[k] = gf256::add(dst_row.coeffs[k], gf256::mul(src_row.coeffs[k], q));
    }
    for k in 0..src_row.data.len() {
        dst_row.data[k] = gf256::add(dst_row.data[k], gf256::mul(src_row.data[k], q));
    }
}

/// Gauss-Jordan RLNC decoder for one generation of `k` pieces.
pub struct GaussElimDecoder {
    piece_count: usize,
    rows: Vec<DecoderRow>,
    /// Coefficient-only scratch for the independence probe, reused
    /// across calls to avoid rebuilding it per candidate.
    probe: Matrix,
}

impl GaussElimDecoder {
    /// A decoder expecting `piece_count` linearly independent pieces.
    pub fn new(piece_count: usize) -> Self {
        GaussElimDecoder {
            piece_count,
            rows: Vec::with_capacity(piece_count),
            probe: Matrix::new(piece_count),
        }
    }

    /// Number of pieces coded together.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Payload size in bytes; zero until the first piece arrives.
    pub fn piece_size(&self) -> usize {
        self.rows.first().map(|r| r.data.len()).unwrap_or(0)
    }

    /// Dimension of the subspace spanned by the accepted coding vectors.
    /// The rows are kept in RREF with zero rows compacted away, so the
    /// rank is simply the row count.
    pub fn rank(&self) -> usize {
        self.rows.len()
    }

    /// Whether the generation is fully recoverable.
    pub fn is_decoded(&self) -> bool {
        self.rank() >= self.piece_count
    }

    /// How many more independent pieces are needed. Non-increasing over
    /// any sequence of [`add_piece`](Self::add_piece) calls.
    pub fn required(&self) -> usize {
        self.piece_count - self.rank()
    }

    /// Fraction of the generation recovered so far, in `[0, 1]`.
    pub fn process_rate(&self) -> f64 {
        self.rank() as f64 / self.piece_count as f64
    }

    /// Offer a coded piece to the decoder.
    ///
    /// A piece that is linearly dependent on what the decoder already
    /// holds is dropped silently while the system is still deficient;
    /// once the decoder is complete every further piece fails with
    /// [`CoderError::AllUsefulPiecesReceived`].
    pub fn add_piece(&mut self, coded_piece: CodedPiece) -> Result<(), CoderError> {
        if !self.is_independent(&coded_piece.vector) {
            if self.is_decoded() {
                return Err(CoderError::AllUsefulPiecesReceived);
            }
            return Ok(());
        }
        self.rows.push(DecoderRow {
            coeffs: coded_piece.vector,
            data: coded_piece.piece,
        });
        self.rref();
        Ok(())
    }

    /// Fetch decoded piece `index`.
    ///
    /// Available before full rank whenever row `index` has already
    /// collapsed to the `index`-th unit vector.
    pub fn get_piece(&self, index: usize) -> Result<Piece, CoderError> {
        if index >= self.piece_count {
            return Err(CoderError::PieceOutOfBound);
        }
        if index >= self.rows.len() {
            return Err(CoderError::PieceNotDecodedYet);
        }
        let row = &self.rows[index];
        let is_unit = row
            .coeffs
            .iter()
            .enumerate()
            .all(|(j, &c)| if j == index { c == 1 } else { c == 0 });
        if !is_unit {
            return Err(CoderError::PieceNotDecodedYet);
        }
        Ok(row.data.clone())
    }

    /// All original pieces, in order. Fails with
    /// [`CoderError::MoreUsefulPiecesRequired`] before full rank.
    pub fn get_pieces(&self) -> Result<Vec<Piece>, CoderError> {
        if !self.is_decoded() {
            return Err(CoderError::MoreUsefulPiecesRequired);
        }
        Ok(self.rows.iter().map(|r| r.data.clone()).collect())
    }

    // ─── Independence probe ─────────────────────────────────────────────

    /// Whether `vector` extends the span of the accepted rows. Runs the
    /// coefficient-only reduction on a scratch copy so a dependent
    /// candidate never perturbs `(C | D)`.
    fn is_independent(&mut self, vector: &[u8]) -> bool {
        if vector.iter().all(|&c| c == 0) {
            return false;
        }
        if self.rows.is_empty() {
            return true;
        }
        self.probe.clear();
        for row in &self.rows {
            self.probe.push_row(row.coeffs.clone());
        }
        self.probe.push_row(vector.to_vec());
        rref_coeffs(&mut self.probe);
        self.probe.rows() > self.rows.len()
    }

    // ─── Reduction ──────────────────────────────────────────────────────

    fn rref(&mut self) {
        self.forward();
        self.backward();
        self.rows.retain(|r| r.coeffs.iter().any(|&c| c != 0));
    }

    fn forward(&mut self) {
        let rows = self.rows.len();
        let boundary = rows.min(self.piece_count);
        for i in 0..boundary {
            if self.rows[i].coeffs[i] == 0 {
                // Lowest row below carrying a nonzero entry becomes the pivot.
                let Some(pivot) = (i + 1..rows).find(|&p| self.rows[p].coeffs[i] != 0) else {
                    continue;
                };
                self.rows.swap(i, pivot);
            }
            for j in i + 1..rows {
                let lead = self.rows[j].coeffs[i];
                if lead == 0 {
                    continue;
                }
                let q = gf256::div(lead, self.rows[i].coeffs[i]);
                add_scaled(&mut self.rows, j, i, q, i);
            }
        }
    }

    fn backward(&mut self) {
        let boundary = self.rows.len().min(self.piece_count);
        for i in (0..boundary).rev() {
            let pivot = self.rows[i].coeffs[i];
            if pivot == 0 {
                continue;
            }
            for j in 0..i {
                let lead = self.rows[j].coeffs[i];
                if lead == 0 {
                    continue;
                }
                let q = gf256::div(lead, pivot);
                add_scaled(&mut self.rows, j, i, q, i);
            }
            if pivot != 1 {
                let inv = gf256::inv(pivot);
                let row = &mut self.rows[i];
                for c in &mut row.coeffs {
                    *c = gf256::mul(*c, inv);
                }
                for d in &mut row.data {
                    *d = gf256::mul(*d, inv);
                }
            }
        }
    }
}

/// RREF of a coefficient-only matrix: forward and backward elimination,
/// then zero-row compaction. The row count afterwards is the rank.
fn rref_coeffs(m: &mut Matrix) {
    let rows = m.rows();
    let boundary = rows.min(m.cols());
    for i in 0..boundary {
        if m.row(i)[i] == 0 {
            let Some(pivot) = (i + 1..rows).find(|&p| m.row(p)[i] != 0) else {
                continue;
            };
            m.swap_rows(i, pivot);
        }
        for j in i + 1..rows {
            let lead = m.row(j)[i];
            if lead == 0 {
                continue;
            }
            let q = gf256::div(lead, m.row(i)[i]);
            m.add_scaled_row(j, i, q, i);
        }
    }
    for i in (0..boundary).rev() {
        let pivot = m.row(i)[i];
        if pivot == 0 {
            continue;
        }
        for j in 0..i {
            let lead = m.row(j)[i];
            if lead == 0 {
                continue;
            }
            let q = gf256::div(lead, pivot);
            m.add_scaled_row(j, i, q, i);
        }
        if pivot != 1 {
            m.scale_row(i, gf256::inv(pivot));
        }
    }
    m.drop_zero_rows();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, FullRlncEncoder};
    use crate::piece::split_by_count;
    use rand::Rng;

    fn random_data(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::rng().fill_bytes(&mut data);
        data
    }

    #[test]
    fn decodes_after_enough_independent_pieces() {
        let data = random_data(4096);
        let mut enc = FullRlncEncoder::with_piece_count(&data, 16).unwrap();
        let mut dec = GaussElimDecoder::new(16);

        let mut previous_required = dec.required();
        assert_eq!(previous_required, 16);
        while !dec.is_decoded() {
            dec.add_piece(enc.coded_piece()).unwrap();
            assert!(dec.required() <= previous_required, "rank must be monotone");
            previous_required = dec.required();
        }

        let (pieces, _) = split_by_count(&data, 16).unwrap();
        assert_eq!(dec.get_pieces().unwrap(), pieces);
    }

    #[test]
    fn duplicate_piece_is_dropped_silently() {
        let data = random_data(256);
        let mut enc = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
        let mut dec = GaussElimDecoder::new(4);

        let cp = enc.coded_piece();
        dec.add_piece(cp.clone()).unwrap();
        assert_eq!(dec.required(), 3);
        dec.add_piece(cp).unwrap();
        assert_eq!(dec.required(), 3, "dependent row must not change the rank");
    }

    #[test]
    fn zero_vector_is_always_dependent() {
        let mut dec = GaussElimDecoder::new(4);
        dec.add_piece(CodedPiece {
            vector: vec![0; 4],
            piece: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(dec.rank(), 0);
    }

    #[test]
    fn complete_decoder_rejects_further_pieces() {
        let data = random_data(512);
        let mut enc = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
        let mut dec = GaussElimDecoder::new(4);
        while !dec.is_decoded() {
            dec.add_piece(enc.coded_piece()).unwrap();
        }
        assert_eq!(
            dec.add_piece(enc.coded_piece()),
            Err(CoderError::AllUsefulPiecesReceived)
        );
    }

    #[test]
    fn get_piece_bounds_and_progress() {
        let data = random_data(512);
        let (pieces, _) = split_by_count(&data, 4).unwrap();
        let mut dec = GaussElimDecoder::new(4);

        assert_eq!(dec.get_piece(4), Err(CoderError::PieceOutOfBound));
        assert_eq!(dec.get_piece(0), Err(CoderError::PieceNotDecodedYet));
        assert_eq!(dec.get_pieces(), Err(CoderError::MoreUsefulPiecesRequired));

        // A systematic piece is readable immediately.
        let mut vector = vec![0u8; 4];
        vector[0] = 1;
        dec.add_piece(CodedPiece {
            vector,
            piece: pieces[0].clone(),
        })
        .unwrap();
        assert_eq!(dec.get_piece(0).unwrap(), pieces[0]);
        assert_eq!(dec.get_piece(1), Err(CoderError::PieceNotDecodedYet));
        assert!((dec.process_rate() - 0.25).abs() < 1e-9);
    }
}
