//! Classifier throughput on large simulation logs.
//!
//! Builds deterministic UVM-style logs of increasing size and measures a full
//! classification pass, once for a log that ends in a clean summary and once
//! for a log whose failure marker sits near the end.
//!
//! Run with:
//! `cargo bench --bench classifier`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use simreg::domain::models::ClassifierConfig;
use simreg::services::Classifier;

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];

fn build_log(lines: usize, failing: bool) -> String {
    let mut log = String::with_capacity(lines * 80);
    for i in 0..lines {
        log.push_str(&format!(
            "UVM_INFO axi4_master_driver.sv({}) @ {}: uvm_test_top.env.agent [DRV] beat {} addr=0x{:08x}\n",
            100 + i % 37,
            i * 10,
            i,
            i * 4
        ));
    }
    if failing {
        log.push_str("UVM_ERROR axi4_scoreboard.sv(212) @ 99990: [SB] data mismatch\n");
    }
    log.push_str("--- UVM Report Summary ---\n** Report counts by severity\n");
    log.push_str(&format!("UVM_INFO : {lines}\nUVM_WARNING : 0\n"));
    log.push_str(&format!("UVM_ERROR : {}\nUVM_FATAL : 0\n", u32::from(failing)));
    log.push_str("$finish called from file \"top.sv\", line 40.\n");
    log
}

fn bench_classify(c: &mut Criterion) {
    let classifier = match Classifier::new(ClassifierConfig::default()) {
        Ok(classifier) => classifier,
        Err(e) => panic!("classifier patterns must compile: {e}"),
    };
    let mut group = c.benchmark_group("classify");

    for &lines in &SIZES {
        for (label, failing) in [("clean", false), ("failing", true)] {
            let log = build_log(lines, failing);
            group.throughput(Throughput::Bytes(log.len() as u64));
            group.bench_with_input(BenchmarkId::new(label, lines), &log, |b, log| {
                b.iter(|| classifier.classify(black_box(""), black_box(Some(log.as_str()))));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
