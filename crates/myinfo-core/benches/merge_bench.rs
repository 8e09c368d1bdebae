use criterion::{criterion_group, criterion_main, Criterion};
use myinfo_core::{build_page, merge_documents, Document};
use serde_json::Value;

const TEMPLATE: &str = r#"<html><body><div id="info-list"></div></body></html>"#;

fn mk_document(size: usize, offset: usize) -> Document {
    (0..size)
        .map(|index| (format!("Field Label {index}"), Value::from(format!("value {}", index + offset))))
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let current = mk_document(1_000, 0);
    let changed = mk_document(500, 1);
    let unchanged = mk_document(500, 0);

    c.bench_function("merge_500_changed_into_1000", |b| {
        b.iter(|| merge_documents(&current, changed.clone()));
    });
    c.bench_function("merge_500_unchanged_into_1000", |b| {
        b.iter(|| merge_documents(&current, unchanged.clone()));
    });
}

fn bench_page(c: &mut Criterion) {
    let document = mk_document(1_000, 0);

    c.bench_function("build_page_1000_items", |b| {
        b.iter(|| {
            if let Err(err) = build_page(&document, TEMPLATE) {
                panic!("page benchmark failed: {err}");
            }
        });
    });
}

criterion_group!(merge_benches, bench_merge, bench_page);
criterion_main!(merge_benches);
