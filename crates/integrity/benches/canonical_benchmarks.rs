//! Canonicalization and digest throughput over representative bodies.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use tollgate_integrity::{DigestAlgorithm, IntegrityVerifier, canonicalize};

fn product_body(items: usize) -> Vec<u8> {
    let products: Vec<Value> = (0..items)
        .map(|i| {
            json!({
                "sku": format!("SKU-{i:05}"),
                "name": "Guantes de nitrilo",
                "quantity": i * 3,
                "price": 12.5,
                "tags": ["medical", "disposable"],
                "warehouse": { "zone": "B", "shelf": i % 40 }
            })
        })
        .collect();
    serde_json::to_vec_pretty(&json!({ "products": products, "batch": "2024-Q1" }))
        .unwrap_or_default()
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    for items in [1usize, 50, 500] {
        let body = product_body(items);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &body, |b, body| {
            b.iter(|| canonicalize(black_box(body), Some("application/json")).len())
        });
    }
    group.finish();
}

fn bench_check(c: &mut Criterion) {
    let verifier = IntegrityVerifier::default();
    let body = product_body(50);
    let canonical = canonicalize(&body, Some("application/json")).into_owned();
    let header = format!("sha256={}", DigestAlgorithm::Sha256.hex_digest(&canonical));

    c.bench_function("check_50_products", |b| {
        b.iter(|| {
            verifier
                .check(black_box(&body), Some("application/json"), black_box(&header))
                .is_ok()
        })
    });
}

criterion_group!(benches, bench_canonicalize, bench_check);
criterion_main!(benches);
