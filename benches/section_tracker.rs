//! Section tracker throughput.
//!
//! Position translation runs on every tick and every seek, so it must stay
//! negligible next to a bus round trip.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use pipeplay::SectionTracker;

const TOTAL_MS: i64 = 3_600_000;

fn tracker(section: Option<(i64, i64)>) -> SectionTracker {
    let mut tracker = SectionTracker::new();
    tracker.update_total_duration(TOTAL_MS);
    if let Some((start, duration)) = section {
        tracker.set_section(start, duration);
    }
    tracker
}

fn bench_position_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_translation");

    let cases = [
        ("whole_track", None),
        ("bounded_section", Some((600_000, 240_000))),
        ("open_section", Some((1_200_000, -1))),
    ];

    for (name, section) in cases {
        let tracker = tracker(section);
        group.bench_function(BenchmarkId::new("to_relative", name), |b| {
            b.iter(|| {
                for absolute in (0..TOTAL_MS).step_by(1_000) {
                    black_box(tracker.to_relative(black_box(absolute)));
                }
            });
        });
        group.bench_function(BenchmarkId::new("is_outside", name), |b| {
            b.iter(|| {
                for absolute in (0..TOTAL_MS).step_by(1_000) {
                    black_box(tracker.is_outside(black_box(absolute)));
                }
            });
        });
    }

    group.finish();
}

fn bench_duration_update(c: &mut Criterion) {
    c.bench_function("update_total_duration", |b| {
        let mut tracker = tracker(Some((600_000, 240_000)));
        b.iter(|| {
            black_box(tracker.update_total_duration(black_box(TOTAL_MS)));
            black_box(tracker.duration());
        });
    });
}

criterion_group!(benches, bench_position_translation, bench_duration_update);
criterion_main!(benches);
