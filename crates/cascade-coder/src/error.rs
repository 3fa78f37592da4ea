//! Typed errors surfaced by the codec.

use thiserror::Error;

/// Everything that can go wrong while splitting, coding or decoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoderError {
    /// Requested zero pieces, or a piece size that forces fewer than two.
    #[error("piece count must be > 0 and leave at least two pieces")]
    BadPieceCount,

    /// More pieces requested than there are bytes to fill them.
    #[error("piece count exceeds total byte count")]
    PieceCountMoreThanTotalBytes,

    /// Piece size of zero bytes.
    #[error("piece size must be > 0")]
    ZeroPieceSize,

    /// Flattened buffer does not divide evenly into coded pieces.
    #[error("flattened data length is not a multiple of the coded piece count")]
    CodedDataLengthMismatch,

    /// Coding vector would not fit inside one coded piece.
    #[error("coding vector length must be smaller than the coded piece length")]
    CodingVectorLengthMismatch,

    /// Matrix multiply with incompatible shapes.
    #[error("matrix dimensions do not match")]
    MatrixDimensionMismatch,

    /// Piece index past the generation's piece count.
    #[error("piece index out of bounds")]
    PieceOutOfBound,

    /// The requested row has not been reduced to a unit vector yet.
    #[error("piece not decoded yet")]
    PieceNotDecodedYet,

    /// Full decode requested before reaching full rank.
    #[error("more useful pieces required before decoding")]
    MoreUsefulPiecesRequired,

    /// Decoder already holds `k` independent pieces; nothing new can help.
    #[error("all useful pieces have already been received")]
    AllUsefulPiecesReceived,
}
