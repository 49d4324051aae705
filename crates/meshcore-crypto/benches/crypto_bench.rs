//! Performance benchmarks for meshcore-crypto.
//!
//! Run with: `cargo bench -p meshcore-crypto`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use meshcore_crypto::constant_time::ct_eq;
use meshcore_crypto::hash::{sha256_parts, sha512};
use meshcore_crypto::{MeshAddress, PrivateKey};
use rand_core::OsRng;

fn bench_address_derivation(c: &mut Criterion) {
    let public = PrivateKey::generate(&mut OsRng).public_key();
    c.bench_function("address_for_public_key", |b| {
        b.iter(|| MeshAddress::for_public_key(black_box(&public)))
    });
}

fn bench_exchange(c: &mut Criterion) {
    let ours = PrivateKey::generate(&mut OsRng);
    let theirs = PrivateKey::generate(&mut OsRng).public_key();
    c.bench_function("x25519_exchange", |b| {
        b.iter(|| ours.exchange(black_box(&theirs)))
    });
}

fn bench_hashes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha512");
    for size in [32, 256, 4096] {
        let data = vec![0xAA; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| sha512(black_box(&data)))
        });
    }
    group.finish();

    c.bench_function("admin_auth_hash", |b| {
        let parts: [&[u8]; 2] = [b"password", b"1700000000"];
        b.iter(|| sha256_parts(black_box(&parts)))
    });
}

fn bench_ct_eq(c: &mut Criterion) {
    let a = [0x42u8; 64];
    let b = [0x42u8; 64];
    c.bench_function("ct_eq_64", |bench| bench.iter(|| ct_eq(black_box(&a), black_box(&b))));
}

criterion_group!(
    benches,
    bench_address_derivation,
    bench_exchange,
    bench_hashes,
    bench_ct_eq
);
criterion_main!(benches);
