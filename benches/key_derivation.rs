//! Benchmarks for cache key derivation
//!
//! This benchmark measures:
//! - Canonical parameter serialization overhead
//! - SHA-256 digest and hex encoding speed
//! - Scaling with parameter count

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ai_gatekit::cache::{KeyGenerator, Params};

fn params_with(count: usize) -> Params {
    let mut params = Params::new();
    params.insert(
        "prompt".to_string(),
        serde_json::Value::from("Summarize the quarterly report in three bullet points."),
    );
    params.insert("model".to_string(), serde_json::Value::from("gen-large"));
    params.insert("temperature".to_string(), serde_json::Value::from(0.2));
    for i in 0..count {
        params.insert(
            format!("option_{}", i),
            serde_json::Value::from(format!("value-{}", i)),
        );
    }
    params
}

fn bench_key_derivation(c: &mut Criterion) {
    let keygen = KeyGenerator::new();
    let mut group = c.benchmark_group("key_derivation");

    for count in [0usize, 8, 32] {
        let params = params_with(count);
        group.bench_with_input(
            BenchmarkId::new("derive", count + 3),
            &params,
            |b, params| {
                b.iter(|| {
                    black_box(keygen.derive(
                        black_box("chat"),
                        black_box("prompt-v3"),
                        black_box(params),
                    ))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_key_derivation);
criterion_main!(benches);
