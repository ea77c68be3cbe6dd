// tests/test_assembler.rs — Seamless cloning end to end on the CPU solver.

use poissonviz::assembler::SeamlessCloneAssembler;
use poissonviz::config::SolverConfig;
use poissonviz::field::Field;
use poissonviz::solver::{CpuSolver, Solver};
use poissonviz::system::{Offset, SystemAssembler};
use poissonviz::testing::clone_images;

fn solver(offset: Offset) -> CpuSolver<SeamlessCloneAssembler> {
    let (source, target) = clone_images(17, 40);
    let asm = SeamlessCloneAssembler::new(source, target);
    let mut s = CpuSolver::new(asm, SolverConfig::default()).unwrap();
    s.set_offset(offset.dx, offset.dy).unwrap();
    s.rebuild(true).unwrap();
    s
}

#[test]
fn clone_converges() {
    let mut s = solver(Offset::new(10, 12));
    let first = s.average_residual().unwrap();
    for _ in 0..15 {
        s.start(4).unwrap();
    }
    let last = s.average_residual().unwrap();
    assert!(last < first * 0.05, "{first} -> {last}");
}

#[test]
fn boundary_pixels_match_target() {
    let offset = Offset::new(5, 7);
    let mut s = solver(offset);
    for _ in 0..3 {
        s.start(2).unwrap();
    }
    let x = s.current_solution().unwrap();
    let target = s.assembler().target().clone();
    for (px, py, t) in x.texels() {
        if !s.assembler().is_active(px, py) {
            let expected = target.get(px + 5, py + 7);
            assert_eq!(t, expected, "boundary ({px}, {py}) drifted");
        }
    }
}

#[test]
fn harmonic_target_is_a_fixed_point() {
    // A flat source has zero guidance, so the interior solves Laplace's
    // equation with the target as boundary. x² - y² is discrete harmonic,
    // so the target itself is the solution and must not drift.
    let source = Field::filled(11, 11, [0.3, 0.3, 0.3, 1.0]);
    let harmonic = |x: usize, y: usize| {
        let (u, v) = (x as f32 - 15.0, y as f32 - 15.0);
        0.5 + (u * u - v * v) / 900.0
    };
    let target = Field::from_fn(30, 30, |x, y| [harmonic(x, y), 0.5, 0.25, 1.0]);
    let asm = SeamlessCloneAssembler::new(source, target);
    let mut s = CpuSolver::new(asm, SolverConfig::default()).unwrap();
    s.set_offset(8, 8).unwrap();
    for _ in 0..10 {
        s.start(6).unwrap();
    }
    let x = s.current_solution().unwrap();
    for (px, py, t) in x.texels() {
        let expected = harmonic(px + 8, py + 8);
        assert!((t[0] - expected).abs() < 1e-4, "({px}, {py}): {} vs {expected}", t[0]);
        assert!((t[1] - 0.5).abs() < 1e-4);
    }
    assert!(s.average_residual().unwrap() < 1e-5);
}

#[test]
fn moving_the_patch_keeps_interior_warm() {
    let mut s = solver(Offset::new(10, 10));
    for _ in 0..10 {
        s.start(4).unwrap();
    }
    let settled = s.average_residual().unwrap();

    s.set_offset(11, 10).unwrap();
    let after_move = s.average_residual().unwrap();

    // A cold start at the new offset for comparison.
    let mut cold = solver(Offset::new(11, 10));
    let cold_start = cold.average_residual().unwrap();

    assert!(after_move > settled, "boundary change must show up in the residual");
    assert!(after_move < cold_start, "warm {after_move} vs cold {cold_start}");
}

#[test]
fn composite_pastes_only_masked_pixels() {
    let mut s = solver(Offset::new(3, 4));
    s.start(2).unwrap();
    let x = s.current_solution().unwrap();
    let out = s.assembler().composite(&x, s.offset());
    let target = s.assembler().target();
    assert_eq!(out.dims(), target.dims());
    // Far outside the patch the target is untouched.
    assert_eq!(out.get(35, 35), target.get(35, 35));
    // Patch corner is outside the round mask.
    assert_eq!(out.get(3, 4), target.get(3, 4));
    // Patch centre is pasted with opaque alpha.
    assert_eq!(out.get(3 + 8, 4 + 8)[3], 1.0);
    assert_eq!(s.assembler().dimensions(), (17, 17));
}
