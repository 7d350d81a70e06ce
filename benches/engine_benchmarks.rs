use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glucowatch::engine::{classify, EngineConfig, PollingScheduler, ReadingHistory, ThresholdConfig, TickPayload};
use glucowatch::source::{DeviceStatus, Reading, TrendDirection};
use serde_json::json;

/// Benchmark threshold classification across the glucose range
fn bench_classify(c: &mut Criterion) {
    let thresholds = ThresholdConfig::default();

    c.bench_function("classify_range", |b| {
        b.iter(|| (20..=400).map(|value| classify(value, &thresholds)).count())
    });
}

/// Benchmark frozen-sensor detection on a full history ring
fn bench_frozen_detection(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let mut group = c.benchmark_group("is_frozen");

    for flat_tail in [3usize, 6, 12] {
        let mut history = ReadingHistory::new();
        for i in 0..12 {
            let value = if i >= 12 - flat_tail { 140 } else { 100 + i as i32 };
            let reading = Reading::new(value, TrendDirection::Flat, start + Duration::minutes(5 * i as i64));
            history.record(&reading);
        }

        group.bench_with_input(BenchmarkId::from_parameter(flat_tail), &history, |b, history| {
            b.iter(|| history.is_frozen(15, 3))
        });
    }
    group.finish();
}

/// Benchmark device status path lookups
fn bench_device_status(c: &mut Criterion) {
    let status = DeviceStatus::from_value(json!({
        "created_at": "2024-03-01T12:00:00Z",
        "pump": {"reservoir": 112.4, "battery": {"percent": 75}},
        "openaps": {"iob": {"iob": 1.4}, "suggested": {"COB": 22, "timestamp": "2024-03-01T11:58:30Z"}}
    }));

    c.bench_function("device_status_helpers", |b| {
        b.iter(|| {
            (
                status.reservoir_units(),
                status.battery_percent(),
                status.insulin_on_board(),
                status.carbs_on_board(),
                status.loop_timestamp(),
            )
        })
    });
}

/// Benchmark one scheduler tick plus snapshot serialization
fn bench_scheduler_tick(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

    c.bench_function("scheduler_tick", |b| {
        b.iter(|| {
            let mut scheduler = PollingScheduler::new(EngineConfig::default(), None);
            let reading = Reading::new(62, TrendDirection::SingleDown, now).with_delta(-8.0);
            scheduler.on_fetch_success(TickPayload::reading(reading), now);
            scheduler.take_alarms().len()
        })
    });

    let mut scheduler = PollingScheduler::new(EngineConfig::default(), None);
    for i in 0..12 {
        let at = now + Duration::minutes(5 * i);
        scheduler.on_fetch_success(TickPayload::reading(Reading::new(120, TrendDirection::Flat, at)), at);
    }
    let snapshot = scheduler.snapshot(now + Duration::hours(1));

    c.bench_function("snapshot_serialization", |b| {
        b.iter(|| serde_json::to_string(&snapshot).expect("Should serialize"))
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_frozen_detection,
    bench_device_status,
    bench_scheduler_tick
);
criterion_main!(benches);
