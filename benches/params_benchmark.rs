//! Performance benchmarks for hpltune
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hpltune::config::SweepConfig;
use hpltune::tuning::{
    compute_affinity, compute_process_grid, parse_sweep_log, select_optimal, ArtifactGenerator,
    ParameterCalculator, ResourceFacts,
};
use std::fmt::Write;

fn facts(gpus: u32) -> ResourceFacts {
    ResourceFacts {
        mem_per_node_mb: 515_000,
        gpus_per_node: gpus,
        cpus_per_node: 16 * gpus,
        affinity_table: (0..gpus)
            .map(|g| format!("{}\t{}-{}\n", g, g * 16, g * 16 + 15))
            .collect(),
    }
}

/// A sweep log with `rows` result lines among scheduler noise
fn sweep_log(rows: usize) -> String {
    let mut log = String::from("HPL-AI 1.0.0 -- High-Performance Linpack benchmark for AI\n");
    for i in 0..rows {
        let _ = writeln!(
            log,
            "HPL_AI WR01L2L4 {} {} 4 8 {:.2} {:.3e} 6.9 2 {:.3e}",
            240_000 + i * 1000,
            64 * (i % 16 + 1),
            20.0 + i as f64 * 0.1,
            7.0e4 + (i % 97) as f64 * 31.0,
            5.8e4 + (i % 89) as f64 * 17.0
        );
        if i % 10 == 0 {
            log.push_str("srun: warning: step creation temporarily disabled\n");
        }
    }
    log
}

fn bench_process_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_grid");

    for gpus in [8u32, 64, 1024, 4099] {
        group.bench_with_input(BenchmarkId::from_parameter(gpus), &gpus, |b, gpus| {
            b.iter(|| black_box(compute_process_grid(*gpus)))
        });
    }

    group.finish();
}

fn bench_affinity(c: &mut Criterion) {
    let table = facts(8).affinity_table;

    c.bench_function("affinity_8_gpus_32_tasks", |b| {
        b.iter(|| black_box(compute_affinity(&table, 32, 8)))
    });
}

fn bench_render_phase(c: &mut Criterion) {
    let calc = ParameterCalculator::new(SweepConfig::default());
    let generator = ArtifactGenerator::default();
    let facts = facts(8);

    c.bench_function("plan_and_render_sweep", |b| {
        b.iter(|| {
            let dat = calc.sweep_dat(&facts, 4).unwrap();
            let sbatch = calc.sbatch(&facts, &dat, 4, "hpl.sqsh", "/scratch/hpl").unwrap();
            black_box(generator.generate(&dat, &sbatch).unwrap())
        });
    });
}

fn bench_result_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_parsing");

    for rows in [100usize, 10_000] {
        let log = sweep_log(rows);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &log, |b, log| {
            b.iter(|| black_box(select_optimal(&parse_sweep_log(log)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_process_grid,
    bench_affinity,
    bench_render_phase,
    bench_result_parsing
);

criterion_main!(benches);
