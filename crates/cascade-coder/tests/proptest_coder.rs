//! Property-based tests for the RLNC codec.

use cascade_coder::decoder::GaussElimDecoder;
use cascade_coder::encoder::{
    Encoder, FullRlncEncoder, SparseRlncEncoder, SystematicRlncEncoder,
};
use cascade_coder::piece::{coded_pieces_from_flat, split_by_count, CodedPiece};
use cascade_coder::recoder::FullRlncRecoder;
use cascade_coder::{gf256, CoderError};
use proptest::prelude::*;

fn deterministic_data(len: usize, seed: u64) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64).wrapping_mul(131).wrapping_add(seed)) as u8)
        .collect()
}

// ─── Field Identities ───────────────────────────────────────────────────────

proptest! {
    /// div(mul(a, b), b) = a and mul(a, inv(a)) = 1 for nonzero operands.
    #[test]
    fn field_round_trips(a in 0u8..=255, b in 1u8..=255) {
        prop_assert_eq!(gf256::div(gf256::mul(a, b), b), a);
        if a != 0 {
            prop_assert_eq!(gf256::mul(a, gf256::inv(a)), 1);
        }
    }
}

// ─── Splitter ───────────────────────────────────────────────────────────────

proptest! {
    /// Splitting yields `count` equal rows whose concatenation, minus
    /// padding, is the input.
    #[test]
    fn split_concat_identity(
        len in 2usize..=512,
        count_seed in 0usize..512,
        seed in any::<u64>(),
    ) {
        let count = 2 + count_seed % (len - 1);
        let data = deterministic_data(len, seed);

        let (pieces, padding) = split_by_count(&data, count).unwrap();
        prop_assert_eq!(pieces.len(), count);
        let size = pieces[0].len();
        prop_assert!(pieces.iter().all(|p| p.len() == size));

        let joined: Vec<u8> = pieces.concat();
        prop_assert_eq!(joined.len(), len + padding);
        prop_assert_eq!(&joined[..len], &data[..]);
        prop_assert!(joined[len..].iter().all(|&b| b == 0));
    }
}

// ─── Flatten / Parse ────────────────────────────────────────────────────────

proptest! {
    /// parse ∘ flatten is the identity on well-formed buffers.
    #[test]
    fn flatten_parse_identity(
        k in 1usize..=16,
        piece_len in 1usize..=64,
        n in 1usize..=8,
        seed in any::<u64>(),
    ) {
        let pieces: Vec<CodedPiece> = (0..n)
            .map(|i| CodedPiece {
                vector: deterministic_data(k, seed.wrapping_add(i as u64)),
                piece: deterministic_data(piece_len, seed.wrapping_mul(31).wrapping_add(i as u64)),
            })
            .collect();
        let flat: Vec<u8> = pieces.iter().flat_map(CodedPiece::flatten).collect();
        let parsed = coded_pieces_from_flat(&flat, n, k).unwrap();
        prop_assert_eq!(parsed, pieces);
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

proptest! {
    /// Any encoder's output decodes back to the originals, and the
    /// required count never increases along the way.
    #[test]
    fn decoder_recovers_originals(
        len in 64usize..=512,
        k in 2usize..=12,
        seed in any::<u64>(),
    ) {
        let data = deterministic_data(len, seed);
        let mut enc = FullRlncEncoder::with_piece_count(&data, k).unwrap();
        let mut dec = GaussElimDecoder::new(k);

        let mut required = dec.required();
        // 4·k draws make residual rank deficiency astronomically unlikely.
        for _ in 0..4 * k {
            if dec.is_decoded() {
                break;
            }
            dec.add_piece(enc.coded_piece()).unwrap();
            prop_assert!(dec.required() <= required);
            required = dec.required();
        }
        prop_assert!(dec.is_decoded());

        let (pieces, _) = split_by_count(&data, k).unwrap();
        prop_assert_eq!(dec.get_pieces().unwrap(), pieces);
    }
}

proptest! {
    /// Recoder transparency: pieces recoded from any m >= k encoder
    /// outputs decode exactly like fresh encoder outputs.
    #[test]
    fn recoder_is_transparent_to_the_decoder(
        len in 64usize..=256,
        k in 2usize..=8,
        extra in 0usize..=4,
        seed in any::<u64>(),
    ) {
        let data = deterministic_data(len, seed);
        let mut enc = FullRlncEncoder::with_piece_count(&data, k).unwrap();
        let held: Vec<CodedPiece> = (0..k + extra).map(|_| enc.coded_piece()).collect();
        let mut recoder = FullRlncRecoder::new(held);

        let mut dec = GaussElimDecoder::new(k);
        for _ in 0..6 * k {
            if dec.is_decoded() {
                break;
            }
            let _ = dec.add_piece(recoder.coded_piece().unwrap());
        }
        // The held set spans the full space with overwhelming probability;
        // when it happens not to, the decoder simply cannot finish and
        // that is not a recoder defect.
        if dec.is_decoded() {
            let (pieces, _) = split_by_count(&data, k).unwrap();
            prop_assert_eq!(dec.get_pieces().unwrap(), pieces);
        }
    }
}

// ─── End-to-End Scenarios ───────────────────────────────────────────────────

/// 256 KiB, k = 16, full RLNC: 18 draws, shuffled, decode, byte-compare.
#[test]
fn round_trip_256k_full_rlnc() {
    let data = deterministic_data(262_144, 0xC0DE);
    let mut enc = FullRlncEncoder::with_piece_count(&data, 16).unwrap();
    assert_eq!(enc.piece_size(), 16_384);

    let mut coded: Vec<CodedPiece> = (0..18).map(|_| enc.coded_piece()).collect();
    // Deterministic shuffle; RLNC decoding is order-oblivious.
    for i in (1..coded.len()).rev() {
        coded.swap(i, (i * 7 + 3) % (i + 1));
    }

    let mut dec = GaussElimDecoder::new(16);
    let mut adds = 0;
    for cp in coded {
        if dec.is_decoded() {
            break;
        }
        dec.add_piece(cp).unwrap();
        adds += 1;
    }
    assert!(dec.is_decoded(), "16 of 18 random pieces must span");
    assert!(adds <= 18);

    let reassembled: Vec<u8> = dec.get_pieces().unwrap().concat();
    assert_eq!(&reassembled[..data.len()], &data[..]);
}

/// Systematic prefix: the first k emissions are the unit-vector pieces
/// in order.
#[test]
fn systematic_prefix_round_trip() {
    let data = deterministic_data(262_144, 0xBEEF);
    let (pieces, _) = split_by_count(&data, 16).unwrap();
    let mut enc = SystematicRlncEncoder::with_piece_count(&data, 16).unwrap();

    let mut dec = GaussElimDecoder::new(16);
    for (i, original) in pieces.iter().enumerate() {
        let cp = enc.coded_piece();
        assert!(cp.is_systematic());
        assert_eq!(cp.vector[i], 1);
        assert_eq!(&cp.piece, original);
        dec.add_piece(cp).unwrap();
    }
    assert!(dec.is_decoded());
    assert_eq!(dec.get_pieces().unwrap(), pieces);
}

/// Sparse drop clamp: k = 8 with p = 0.99 must run at p = 0.25; the
/// empirical zero rate over 10 000 vectors stays within [0.22, 0.28].
#[test]
fn sparse_clamp_empirical_zero_rate() {
    let data = deterministic_data(4096, 0xFEED);
    let mut enc = SparseRlncEncoder::with_piece_count(&data, 8, 0.99).unwrap();
    assert!((enc.drop_probability() - 0.25).abs() < 1e-9);

    let mut zeros = 0usize;
    let mut total = 0usize;
    for _ in 0..10_000 {
        let cp = enc.coded_piece();
        zeros += cp.vector.iter().filter(|&&c| c == 0).count();
        total += cp.vector.len();
    }
    // A uniform draw lands on zero 1/256 of the time on its own, so the
    // observed rate sits marginally above the drop probability.
    let rate = zeros as f64 / total as f64;
    assert!(
        (0.22..=0.28).contains(&rate),
        "empirical zero rate {rate} outside [0.22, 0.28]"
    );
}

/// Feeding the same piece twice leaves `required` untouched.
#[test]
fn dependent_piece_rejection() {
    let data = deterministic_data(256, 0xABAD);
    let mut enc = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
    let mut dec = GaussElimDecoder::new(4);

    let cp = enc.coded_piece();
    dec.add_piece(cp.clone()).unwrap();
    assert_eq!(dec.required(), 3);
    dec.add_piece(cp).unwrap();
    assert_eq!(dec.required(), 3);
}

/// Recoder forwarding: 4 coded pieces for k = 4, 10 recoded emissions,
/// fresh decoder must finish.
#[test]
fn recoder_forwarding_decodes() {
    let data = deterministic_data(1024, 0xF00D);
    let mut enc = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
    let held: Vec<CodedPiece> = (0..4).map(|_| enc.coded_piece()).collect();
    let mut recoder = FullRlncRecoder::new(held);

    let mut dec = GaussElimDecoder::new(4);
    for _ in 0..10 {
        if dec.is_decoded() {
            break;
        }
        match dec.add_piece(recoder.coded_piece().unwrap()) {
            Ok(()) => {}
            Err(CoderError::AllUsefulPiecesReceived) => break,
            Err(e) => panic!("unexpected decoder error: {e}"),
        }
    }
    assert!(dec.is_decoded());

    let (pieces, _) = split_by_count(&data, 4).unwrap();
    assert_eq!(dec.get_pieces().unwrap(), pieces);
}
