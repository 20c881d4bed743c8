use airplay_crypto::kdf::derive_stream_key;
use airplay_crypto::{AesCbcCipher, AesCtrCipher, AgreementKeyPair, SigningKeyPair};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark in-place media frame decryption.
///
/// This is the hottest path: every mirroring frame passes through it.
fn bench_media_frame_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("media_frame_decryption");

    // Audio-sized, MTU-sized and video-keyframe-sized frames
    for size in [352, 1500, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        let material = derive_stream_key(&[0x42u8; 32], 1);
        let mut cipher = AesCtrCipher::new(&material);
        let mut frame = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.apply_keystream(black_box(&mut frame)));
        });
    }

    group.finish();
}

/// Benchmark legacy RAOP audio packet decryption.
fn bench_raop_packet_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("raop_packet_decryption");

    for size in [352, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));

        let cipher = AesCbcCipher::new([0x42u8; 16], [0x24u8; 16]);
        let mut packet = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.decrypt_raop(black_box(&mut packet)));
        });
    }

    group.finish();
}

/// Benchmark the server-side cost of one pair-verify handshake.
fn bench_handshake_primitives(c: &mut Criterion) {
    let server = AgreementKeyPair::generate().unwrap();
    let client = AgreementKeyPair::generate().unwrap();
    let signer = SigningKeyPair::generate().unwrap();

    c.bench_function("x25519_agreement", |b| {
        b.iter(|| server.diffie_hellman(black_box(client.public_key())));
    });

    c.bench_function("ed25519_sign", |b| {
        b.iter(|| signer.sign(black_box(&[0x11u8; 64])));
    });
}

criterion_group!(
    benches,
    bench_media_frame_decryption,
    bench_raop_packet_decryption,
    bench_handshake_primitives,
);

criterion_main!(benches);
