//! Authentication tree benchmarks
//!
//! Measures tree generation for common orders and the per-message cost of
//! releasing and verifying a secret.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use paser_crypto::auth_tree::{self, AuthTree};

fn bench_regenerate(c: &mut Criterion) {
    for order in [8u32, 10, 12] {
        c.bench_with_input(BenchmarkId::new("auth_tree_regenerate", order), &order, |b, &order| {
            let mut tree = AuthTree::new(order).unwrap();
            b.iter(|| tree.regenerate().unwrap());
        });
    }
}

fn bench_release_and_verify(c: &mut Criterion) {
    c.bench_function("auth_tree_release_verify", |b| {
        let mut tree = AuthTree::new(12).unwrap();
        tree.regenerate().unwrap();
        b.iter(|| {
            if tree.is_exhausted() {
                tree.regenerate().unwrap();
            }
            let released = tree.release_next_secret().unwrap();
            black_box(auth_tree::verify(&tree.root(), &released.secret, &released.auth_path, 0));
        });
    });
}

criterion_group!(benches, bench_regenerate, bench_release_and_verify);
criterion_main!(benches);
