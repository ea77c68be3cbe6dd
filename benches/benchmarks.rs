// benches/benchmarks.rs -- CPU reference solver benchmarks.
//
//   cargo bench --bench benchmarks
//
// The CPU path exists for testing, not for speed, but timing it per stage
// shows where a V-cycle spends its work: the smoother runs on every level
// twice, the transfers once per level pair, the reduction once per cycle.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use poissonviz::assembler::SeamlessCloneAssembler;
use poissonviz::config::SolverConfig;
use poissonviz::hierarchy::GridHierarchy;
use poissonviz::residual;
use poissonviz::smoother;
use poissonviz::solver::{CpuSolver, Solver};
use poissonviz::stencil::NinePointStencil;
use poissonviz::testing::{clone_images, poisson_problem};

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_smoother(c: &mut Criterion) {
    let mut group = c.benchmark_group("jacobi_sweep");
    for size in [64usize, 256] {
        let sys = poisson_problem(size, size);
        let mut hierarchy = GridHierarchy::new(&sys, &NinePointStencil, Default::default());
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| smoother::smooth(&NinePointStencil, hierarchy.level_mut(0), 0.8, 2))
        });
    }
    group.finish();
}

fn bench_residual(c: &mut Criterion) {
    let sys = poisson_problem(256, 256);
    let mut hierarchy = GridHierarchy::new(&sys, &NinePointStencil, Default::default());

    let mut group = c.benchmark_group("residual");
    group.bench_function("evaluate_256", |b| {
        b.iter(|| residual::evaluate(&NinePointStencil, hierarchy.level_mut(0)))
    });
    group.bench_function("reduce_256", |b| {
        b.iter(|| residual::average_magnitude(hierarchy.residual()))
    });
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy_build");
    for size in [64usize, 256] {
        let sys = poisson_problem(size, size);
        let mut hierarchy = GridHierarchy::new(&sys, &NinePointStencil, Default::default());
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| hierarchy.build(&sys, &NinePointStencil, true))
        });
    }
    group.finish();
}

// ============================================================
// Full V-cycles
// ============================================================

fn bench_vcycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("vcycle");
    for size in [64usize, 128, 256] {
        let mut solver = CpuSolver::new(poisson_problem(size, size), SolverConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("poisson_4_sweeps", size), &size, |b, _| {
            b.iter(|| solver.start(4).unwrap())
        });
    }
    group.finish();
}

fn bench_clone_frame(c: &mut Criterion) {
    // One interactive frame: move the patch, rebuild warm, run a cycle.
    let (source, target) = clone_images(129, 512);
    let mut solver =
        CpuSolver::new(SeamlessCloneAssembler::new(source, target), SolverConfig::default()).unwrap();
    let mut step = 0i32;

    c.bench_function("clone_frame_129", |b| {
        b.iter(|| {
            step = (step + 1) % 64;
            solver.set_offset(100 + step, 100).unwrap();
            solver.start(10).unwrap();
            solver.average_residual().unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_smoother,
    bench_residual,
    bench_build,
    bench_vcycle,
    bench_clone_frame,
);
criterion_main!(benches);
