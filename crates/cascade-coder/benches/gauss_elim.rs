//! Encode/decode throughput of the Gauss-Jordan kernel.

use cascade_coder::decoder::GaussElimDecoder;
use cascade_coder::encoder::{Encoder, FullRlncEncoder};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::RngCore;

fn random_data(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("rlnc_round_trip");
    for &piece_count in &[16usize, 32, 64] {
        let data = random_data(1 << 20);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(piece_count),
            &piece_count,
            |b, &k| {
                b.iter(|| {
                    let mut enc = FullRlncEncoder::with_piece_count(&data, k).unwrap();
                    let mut dec = GaussElimDecoder::new(k);
                    while !dec.is_decoded() {
                        dec.add_piece(enc.coded_piece()).unwrap();
                    }
                    dec.get_pieces().unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
