//! Criterion benchmarks for the SPAKE2 handshake and the pairing cipher.
//!
//! Run with:
//! ```bash
//! cargo bench --package devlink-core --bench pake_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use devlink_core::crypto::channel::PairingCipher;
use devlink_core::crypto::spake2::{password_scalar, PakeRole, Spake2};

fn bench_password_scalar(c: &mut Criterion) {
    c.bench_function("password_scalar", |b| {
        b.iter(|| black_box(password_scalar(black_box(b"123456"))));
    });
}

fn bench_full_handshake(c: &mut Criterion) {
    c.bench_function("spake2_handshake_both_sides", |b| {
        b.iter(|| {
            let a = Spake2::start(PakeRole::Initiator, b"123456").expect("start");
            let r = Spake2::start(PakeRole::Responder, b"123456").expect("start");
            let (x, y) = (*a.message(), *r.message());
            let sa = a.finish(&y).expect("finish");
            let sr = r.finish(&x).expect("finish");
            black_box((sa, sr))
        });
    });
}

fn bench_channel_encrypt(c: &mut Criterion) {
    let a = Spake2::start(PakeRole::Initiator, b"123456").expect("start");
    let r = Spake2::start(PakeRole::Responder, b"123456").expect("start");
    let y = *r.message();
    let secret = a.finish(&y).expect("finish");
    let mut cipher = PairingCipher::new(&secret, PakeRole::Initiator).expect("cipher");
    let peer_info = vec![0x42u8; 300];

    c.bench_function("pairing_cipher_encrypt_300b", |b| {
        b.iter(|| black_box(cipher.encrypt(black_box(&peer_info))));
    });
}

criterion_group!(benches, bench_password_scalar, bench_full_handshake, bench_channel_encrypt);
criterion_main!(benches);
