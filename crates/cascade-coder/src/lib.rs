//! # cascade-coder
//!
//! Random Linear Network Coding over GF(2^8).
//!
//! A generation's payload is split into `k` equal-size pieces; everything
//! that moves between peers is a random linear combination of those pieces,
//! tagged with its coding vector. Any `k` linearly independent combinations
//! recover the originals via Gaussian elimination, and a peer that has not
//! yet decoded can still re-randomize what it holds and forward fresh
//! combinations.
//!
//! ## Crate structure
//!
//! - [`gf256`] — field arithmetic (log/antilog tables, polynomial 0x11D)
//! - [`matrix`] — dense row-major byte matrix with in-place row operations
//! - [`piece`] — pieces, coded pieces, splitting and flattening
//! - [`encoder`] — full, sparse and systematic RLNC encoders
//! - [`decoder`] — incremental Gauss-Jordan decoder
//! - [`recoder`] — re-randomizing forwarder for partially received data

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gf256;
pub mod matrix;
pub mod piece;
pub mod recoder;

pub use decoder::GaussElimDecoder;
pub use encoder::{Encoder, FullRlncEncoder, SparseRlncEncoder, SystematicRlncEncoder};
pub use error::CoderError;
pub use matrix::Matrix;
pub use piece::{CodedPiece, Piece};
pub use recoder::FullRlncRecoder;
