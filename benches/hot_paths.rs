use criterion::{black_box, criterion_group, criterion_main, Criterion};
use summaryd::summary::services::decode_legacy;
use summaryd::tsdb::stat::{parse_latest_stat, parse_latest_stats};

/// Wildcard reply with one segment per mount, as rendered by cactiStyle.
fn mounts_reply(mounts: usize) -> String {
    (0..mounts)
        .map(|i| {
            format!(
                "df-mnt-brick{i}.df_complex-used Current:{}.0 Max:{}.0 Min:0.0\n",
                1_000 + i,
                2_000 + i
            )
        })
        .collect()
}

fn legacy_services_count(services: usize) -> String {
    let body: Vec<String> = (0..services)
        .map(|i| format!("u'service-{i}': {{u'running': {i}, u'not_running': 1}}"))
        .collect();
    format!("{{{}}}", body.join(", "))
}

fn bench_stat_parser(c: &mut Criterion) {
    let single = "cpu.percent-user Current:12.25 Max:40.0 Min:0.5";
    let wildcard = mounts_reply(32);

    c.bench_function("stat/latest_single", |b| {
        b.iter(|| parse_latest_stat(black_box(single)).expect("parse single"))
    });

    c.bench_function("stat/latest_wildcard_32", |b| {
        b.iter(|| parse_latest_stats(black_box(&wildcard)).expect("parse wildcard"))
    });
}

fn bench_legacy_decoder(c: &mut Criterion) {
    let text = legacy_services_count(8);

    c.bench_function("services_count/decode_legacy_8", |b| {
        b.iter(|| decode_legacy(black_box(&text)).expect("decode"))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_stat_parser(c);
    bench_legacy_decoder(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
