//! Benchmark for the naming engine
//!
//! Runs on every reconcile, twice on deletion.

use azurefile_share_provisioner::naming::{compute_share_name, volume_name};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_share_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("naming");
    group.throughput(Throughput::Elements(1));

    group.bench_function("share_name_short", |b| {
        b.iter(|| compute_share_name(black_box("team"), black_box("data"), ""));
    });

    let namespace = "a-rather-long-namespace-belonging-to-some-team";
    let name = "an-even-longer-claim-name-that-needs-truncating";
    group.bench_function("share_name_truncated", |b| {
        b.iter(|| compute_share_name(black_box(namespace), black_box(name), ""));
    });

    group.bench_function("share_name_override", |b| {
        b.iter(|| compute_share_name("team", "data", black_box("Shared.Media_Library")));
    });

    group.finish();
}

fn bench_volume_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("naming");
    group.throughput(Throughput::Elements(1));

    group.bench_function("volume_name", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let uid = format!("uid-{}", counter);
            volume_name("team", "data", "team-data", "account", "rg", black_box(&uid))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_share_names, bench_volume_names);
criterion_main!(benches);
