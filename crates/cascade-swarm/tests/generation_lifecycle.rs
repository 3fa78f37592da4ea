//! Generation state-machine tests: ingestion, persistence, role flips.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cascade_coder::encoder::{Encoder, FullRlncEncoder};
use cascade_swarm::{Generation, GenerationInfo};

fn test_info(dir: &tempfile::TempDir, piece_count: usize, length: u64) -> GenerationInfo {
    GenerationInfo {
        hash: [0x5A; 20],
        serial: 0,
        length,
        piece_count,
        target_path: dir.path().join("target.bin"),
    }
}

fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 17 + 3) % 253) as u8).collect()
}

#[tokio::test]
async fn generation_persists_slab_and_flips_to_seed() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(4096);
    let generation = Generation::new(test_info(&dir, 4, 4096), &[], false);

    generation.start_receiving().await;
    assert!(generation.is_downloading().await);
    let inbound = generation.inbound().await.expect("receiving allocates inbound");

    let mut encoder = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
    // Six draws cover the slim chance of a dependent combination.
    for _ in 0..6 {
        if inbound.send(encoder.coded_piece()).await.is_err() {
            break; // ingestion already stopped after full rank
        }
    }

    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !generation.is_downloaded().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    deadline.await.expect("generation should decode");

    // Truncation pin: exactly `length` bytes on disk, equal to the
    // original, padding stripped.
    let written = std::fs::read(dir.path().join("target.bin")).unwrap();
    assert_eq!(written, data);

    // The ingestion side shuts itself down.
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while generation.is_downloading().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    deadline.await.expect("receiving should stop on its own");
    assert!(generation.inbound().await.is_none());

    // Back on the seed side the generation serves from the slab.
    let coded_piece = generation.get_coded_piece().await.expect("seed side serves");
    assert_eq!(coded_piece.vector.len(), 4);
    assert_eq!(coded_piece.piece.len(), 1024);
    assert!((generation.process_rate().await - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn add_coded_piece_is_a_no_op_once_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(2048);
    std::fs::write(dir.path().join("target.bin"), &data).unwrap();
    let generation = Generation::new(test_info(&dir, 2, 2048), &[], true);

    let mut encoder = FullRlncEncoder::with_piece_count(&data, 2).unwrap();
    generation.add_coded_piece(encoder.coded_piece()).await;
    assert!(generation.is_downloaded().await);
    assert!((generation.process_rate().await - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn start_receiving_is_a_no_op_for_a_downloaded_generation() {
    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::new(test_info(&dir, 2, 2048), &[], true);
    generation.start_receiving().await;
    assert!(!generation.is_downloading().await);
    assert!(generation.inbound().await.is_none());
}

#[tokio::test]
async fn recoder_serves_while_still_receiving() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(4096);
    let generation = Generation::new(test_info(&dir, 4, 4096), &[], false);

    let mut encoder = FullRlncEncoder::with_piece_count(&data, 4).unwrap();
    generation.add_coded_piece(encoder.coded_piece()).await;
    generation.add_coded_piece(encoder.coded_piece()).await;

    // Not decoded yet, but the recoder can already forward combinations.
    assert!(!generation.is_downloaded().await);
    let forwarded = generation.get_coded_piece().await.expect("recoder serves");
    assert_eq!(forwarded.vector.len(), 4, "recoded vector stays in the original basis");
}

#[tokio::test]
async fn malformed_vector_length_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(4096);
    let generation = Generation::new(test_info(&dir, 4, 4096), &[], false);

    let mut encoder = FullRlncEncoder::with_piece_count(&data, 8).unwrap();
    generation.add_coded_piece(encoder.coded_piece()).await;
    assert!((generation.process_rate().await - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn stop_receiving_clears_clients_and_cancels_connections() {
    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::new(
        test_info(&dir, 4, 4096),
        &["10.0.0.1:8080".to_string()],
        false,
    );
    generation.start_receiving().await;
    generation.set_peer_client("10.0.0.1:8080", true).await;

    let connection = CancellationToken::new();
    generation.register_connection(connection.clone()).await;

    generation.stop_receiving().await;
    assert!(connection.is_cancelled());
    assert!(generation.inbound().await.is_none());
    let peers = generation.peers().await;
    assert!(peers.iter().all(|p| !p.have_client));
}

#[tokio::test]
async fn idle_encoder_is_reclaimed_only_after_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(2048);
    std::fs::write(dir.path().join("target.bin"), &data).unwrap();
    let generation = Generation::new(test_info(&dir, 2, 2048), &[], true);

    // Build the encoder by serving once, then sweep immediately: the
    // encoder is fresh and must survive.
    assert!(generation.get_coded_piece().await.is_some());
    generation.drop_idle_encoder().await;
    std::fs::remove_file(dir.path().join("target.bin")).unwrap();
    // With the slab gone, a surviving encoder is the only way to serve.
    assert!(
        generation.get_coded_piece().await.is_some(),
        "fresh encoder must not be reclaimed"
    );
}
