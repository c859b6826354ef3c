use criterion::{black_box, criterion_group, criterion_main, Criterion};
use topoguard::prelude::*;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn bench_extract_half_bridge(c: &mut Criterion) {
    let library = ReferenceLibrary::builtin().unwrap();
    let text = std::fs::read_to_string(fixture_path("hb_eight_caps.net")).unwrap();
    let extractor = NetlistExtractor::new(library.catalog());

    c.bench_function("extract_half_bridge", |b| {
        b.iter(|| extractor.extract(black_box(&text)));
    });
}

fn bench_match_half_bridge(c: &mut Criterion) {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get("HB_TO2473_STAGE").unwrap();
    let extractor = NetlistExtractor::new(library.catalog());
    let engine = EquivalenceEngine::new(&entry.reference);

    let exact = extractor
        .extract(&std::fs::read_to_string(fixture_path("hb_eight_caps.net")).unwrap())
        .unwrap()
        .graph;
    let swapped = extractor
        .extract(&std::fs::read_to_string(fixture_path("hb_swapped_arms.net")).unwrap())
        .unwrap()
        .graph;
    let short = extractor
        .extract(&std::fs::read_to_string(fixture_path("hb_seven_caps.net")).unwrap())
        .unwrap()
        .graph;

    c.bench_function("match_half_bridge_exact", |b| {
        b.iter(|| engine.compare(black_box(&exact)));
    });
    c.bench_function("match_half_bridge_swapped", |b| {
        b.iter(|| engine.compare(black_box(&swapped)));
    });
    c.bench_function("match_half_bridge_missing_cap", |b| {
        b.iter(|| engine.compare(black_box(&short)));
    });
}

criterion_group!(benches, bench_extract_half_bridge, bench_match_half_bridge);
criterion_main!(benches);
