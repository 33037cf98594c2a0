//! Criterion benchmarks for the accessor's local work.
//!
//! Benchmarks:
//! 1. Long → wide pivot of provider rows
//! 2. CSV cache write + reload of a price table
//! 3. Field selection with forward fill

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pxcache_core::{
    select_field, ColumnLevel, CsvCache, Frequency, HistoricalRow, PriceQuery, PriceTable,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_query(n_ids: usize, days: i64) -> PriceQuery {
    let start = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    PriceQuery::from_dates(
        (0..n_ids).map(|i| format!("T{i:03} US Equity")).collect(),
        start,
        start + Duration::days(days - 1),
        Frequency::Daily,
        vec!["PX_LAST".into(), "PX_OPEN".into()],
    )
    .unwrap()
}

fn make_rows(query: &PriceQuery) -> Vec<HistoricalRow> {
    let days = (query.end() - query.start()).num_days() + 1;
    let mut rows = Vec::new();
    for d in 0..days {
        let date = query.start() + Duration::days(d);
        for (i, id) in query.identifiers().iter().enumerate() {
            for field in query.fields() {
                // every 7th cell missing
                let value = ((d as usize + i) % 7 != 0).then(|| 100.0 + (d as f64 * 0.1).sin());
                rows.push(HistoricalRow {
                    date,
                    identifier: id.clone(),
                    field: field.clone(),
                    value,
                });
            }
        }
    }
    rows
}

// ── 1. Pivot ─────────────────────────────────────────────────────────

fn bench_pivot(c: &mut Criterion) {
    let mut group = c.benchmark_group("pivot");

    for &days in &[252_i64, 1260, 5040] {
        let query = make_query(10, days);
        let rows = make_rows(&query);
        group.bench_with_input(BenchmarkId::new("10_ids_2_fields", days), &days, |b, _| {
            b.iter(|| PriceTable::from_long(black_box(rows.clone()), black_box(&query)))
        });
    }

    group.finish();
}

// ── 2. CSV round trip ────────────────────────────────────────────────

fn bench_csv_roundtrip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = CsvCache::new(dir.path());
    let query = make_query(20, 1260);
    let table = PriceTable::from_long(make_rows(&query), &query).unwrap();
    let stem = query.cache_stem();

    c.bench_function("csv_write_read_20_ids_1260_days", |b| {
        b.iter(|| {
            cache.write_price_table(&stem, black_box(&table)).unwrap();
            cache.read_price_table(&stem).unwrap()
        })
    });
}

// ── 3. Reshape ───────────────────────────────────────────────────────

fn bench_select_field(c: &mut Criterion) {
    let query = make_query(50, 2520);
    let table = PriceTable::from_long(make_rows(&query), &query).unwrap();

    c.bench_function("select_px_last_ffill_50_ids", |b| {
        b.iter(|| select_field(black_box(&table), "PX_LAST", ColumnLevel::Field, true))
    });
}

criterion_group!(benches, bench_pivot, bench_csv_roundtrip, bench_select_field);
criterion_main!(benches);
