//! Benchmarks for template rendering.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use packwright::tagging::{render_tags, TagSpec};
use packwright::template::{render, BuildContext};

fn render_benchmark(c: &mut Criterion) {
    let ctx = BuildContext::new()
        .with_source("ami-123")
        .with_region("us-east-1")
        .with_build_name("web")
        .with_var("team", "platform");

    c.bench_function("render_mixed", |b| {
        b.iter(|| render(black_box("built-from-${source} {{ .BuildRegion }} ${var.team}"), &ctx))
    });

    let spec: TagSpec = (0..16)
        .map(|i| (format!("Key{i}"), format!("${{build_name}}-{i}-${{region}}")))
        .collect();
    c.bench_function("render_tags_16", |b| b.iter(|| render_tags(black_box(&spec), &ctx)));
}

criterion_group!(benches, render_benchmark);
criterion_main!(benches);
