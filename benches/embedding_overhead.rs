//! Embedding engine benchmark
//!
//! Measures the TF-IDF fit and the drift metrics for corpora shaped like a
//! real batch: one original text plus one final output per experiment.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench embedding_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use semdrift::config::DEFAULT_ORIGINAL_TEXT;
use semdrift::embedding::{EmbeddingConfig, EmbeddingEngine};
use semdrift::noise::NoiseInjector;

/// Original text followed by `n` corrupted copies at rising noise levels
fn corpus(n: usize) -> Vec<String> {
    let injector = NoiseInjector::new();
    std::iter::once(DEFAULT_ORIGINAL_TEXT.to_string())
        .chain((0..n).map(|i| {
            injector
                .inject(DEFAULT_ORIGINAL_TEXT, (i % 11 * 10) as i64, i as u64)
                .unwrap_or_default()
        }))
        .collect()
}

fn bench_embed(c: &mut Criterion) {
    let engine = EmbeddingEngine::new();
    let mut group = c.benchmark_group("tfidf_embed");

    for size in [10, 100, 500] {
        let docs = corpus(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &docs, |b, docs| {
            b.iter(|| engine.embed(black_box(docs), &EmbeddingConfig::default()));
        });
    }
    group.finish();
}

fn bench_ngram_ranges(c: &mut Criterion) {
    let engine = EmbeddingEngine::new();
    let docs = corpus(100);
    let mut group = c.benchmark_group("tfidf_ngram_range");

    for range in [(1, 1), (1, 3), (2, 4)] {
        let config = EmbeddingConfig::new(1000, range);
        group.bench_with_input(BenchmarkId::from_parameter(config.label()), &config, |b, config| {
            b.iter(|| engine.embed(black_box(&docs), config));
        });
    }
    group.finish();
}

fn bench_metrics(c: &mut Criterion) {
    let engine = EmbeddingEngine::new();
    let docs = corpus(1);
    let Ok(matrix) = engine.embed(&docs, &EmbeddingConfig::default()) else {
        return;
    };
    let (a, b) = match (matrix.row(0), matrix.row(1)) {
        (Some(a), Some(b)) => (a.to_vec(), b.to_vec()),
        _ => return,
    };

    c.bench_function("cosine_distance", |bench| {
        bench.iter(|| engine.cosine_distance(black_box(&a), black_box(&b)))
    });
    c.bench_function("text_similarity", |bench| {
        bench.iter(|| engine.text_similarity(black_box(&docs[0]), black_box(&docs[1])))
    });
    c.bench_function("word_overlap", |bench| {
        bench.iter(|| engine.word_overlap(black_box(&docs[0]), black_box(&docs[1])))
    });
}

criterion_group!(benches, bench_embed, bench_ngram_ranges, bench_metrics);
criterion_main!(benches);
