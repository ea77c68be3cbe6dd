// tests/test_vcycle.rs — V-cycle behaviour on the CPU reference solver.

use poissonviz::config::{ResetPolicy, SolverConfig};
use poissonviz::hierarchy::GridHierarchy;
use poissonviz::residual;
use poissonviz::solver::{CpuSolver, Solver};
use poissonviz::stencil::{NinePointStencil, Stencil};
use poissonviz::system::LinearSystem;
use poissonviz::testing::{all_inactive, poisson_problem, unit_diagonal};
use poissonviz::vcycle::{CpuBackend, VCycle};

/// `poisson_problem` with an extra inactive disc of radius 4 around
/// (24, 11) holding the boundary value 0.3.
fn poisson_with_hole(width: usize, height: usize) -> LinearSystem {
    let mut sys = poisson_problem(width, height);
    let hole = |x: usize, y: usize| {
        let (dx, dy) = (x as i64 - 24, y as i64 - 11);
        dx * dx + dy * dy <= 16
    };
    let (a1, a2, a3) = NinePointStencil::identity();
    for y in 0..height {
        for x in 0..width {
            if hole(x, y) {
                sys.a1.set(x, y, a1);
                sys.a2.set(x, y, a2);
                sys.a3.set(x, y, a3);
                sys.b.set(x, y, [0.3, 0.0, 0.0, 0.0]);
                sys.x0.set(x, y, [0.3, 0.0, 0.0, 0.0]);
            }
        }
    }
    sys
}

// ===== Convergence =====

#[test]
fn residual_is_monotone_on_poisson_problem() {
    let mut s = CpuSolver::new(poisson_problem(16, 16), SolverConfig::default()).unwrap();
    let first = s.average_residual().unwrap();
    assert!(first > 0.1 && first < 0.2, "initial residual {first}");

    let mut prev = first;
    for cycle in 0..12 {
        s.start(2).unwrap();
        s.wait().unwrap();
        let r = s.average_residual().unwrap();
        assert!(r <= prev * (1.0 + 1e-4), "cycle {cycle}: residual rose {prev} -> {r}");
        prev = r;
    }
    assert!(prev < first * 1e-2, "only reached {prev} from {first}");
}

#[test]
fn residual_is_monotone_on_odd_coarse_widths() {
    // Every size here reaches an odd coarse width somewhere in its chain,
    // e.g. 50 → 25 → 13 or 100×60 → 50×30 → 25×15.
    for (w, h) in [(21, 21), (37, 23), (50, 50), (75, 75), (90, 90), (100, 60), (150, 150), (200, 200)] {
        let mut s = CpuSolver::new(poisson_problem(w, h), SolverConfig::default()).unwrap();
        let first = s.average_residual().unwrap();
        let mut prev = first;
        for cycle in 0..8 {
            s.start(2).unwrap();
            let r = s.average_residual().unwrap();
            assert!(r.is_finite() && r <= prev, "{w}×{h} cycle {cycle}: residual rose {prev} -> {r}");
            prev = r;
        }
        assert!(prev < first * 0.05, "{w}×{h}: only reached {prev} from {first}");
    }
}

#[test]
fn masked_vcycle_keeps_inactive_pixels_bit_identical() {
    let sys = poisson_with_hole(37, 23);
    for policy in [ResetPolicy::Zero, ResetPolicy::Retain] {
        let cfg = SolverConfig { reset_policy: policy, ..Default::default() };
        let stencil: &dyn Stencil = &NinePointStencil;
        let mut h = GridHierarchy::new(&sys, stencil, cfg.reset_policy);
        assert_eq!(h.dims(), vec![(37, 23), (19, 12), (10, 6), (5, 3), (3, 2), (2, 1)]);

        let mut vc = VCycle::new();
        residual::evaluate(stencil, h.level_mut(0));
        let first = residual::average_magnitude(h.residual());
        let mut prev = first;
        for cycle in 0..8 {
            let mut backend = CpuBackend { hierarchy: &mut h, stencil, config: &cfg };
            vc.run(&mut backend, 2).unwrap();
            assert_eq!(vc.deepest(), 5);

            let c = h.level(0).coefficients();
            for (x, y, t) in h.solution().texels() {
                if !stencil.is_active(c, x, y) {
                    let want = sys.x0.get(x, y);
                    assert_eq!(t.map(f32::to_bits), want.map(f32::to_bits), "{policy:?}: ({x}, {y}) moved");
                }
            }
            let r = residual::average_magnitude(h.residual());
            assert!(r.is_finite(), "{policy:?} cycle {cycle}: residual {r}");
            if policy == ResetPolicy::Zero {
                assert!(r <= prev, "cycle {cycle}: residual rose {prev} -> {r}");
            }
            prev = r;
        }
        if policy == ResetPolicy::Zero {
            assert!(prev < first * 0.05, "only reached {prev} from {first}");
        }
    }
}

#[test]
fn explicit_correction_weight_overrides_stencil_scale() {
    // A weight of 1 under-corrects a second-order operator: still
    // convergent, but slower than the stencil's own scale.
    let run = |correction_weight| {
        let cfg = SolverConfig { correction_weight, ..Default::default() };
        let mut s = CpuSolver::new(poisson_problem(33, 33), cfg).unwrap();
        for _ in 0..4 {
            s.start(2).unwrap();
        }
        s.average_residual().unwrap()
    };
    let (auto, explicit) = (run(None), run(Some(4.0)));
    assert_eq!(auto, explicit);
    assert!(run(Some(1.0)) > auto);
}

#[test]
fn more_sweeps_converge_faster() {
    let run = |sweeps| {
        let mut s = CpuSolver::new(poisson_problem(16, 16), SolverConfig::default()).unwrap();
        for _ in 0..4 {
            s.start(sweeps).unwrap();
        }
        s.average_residual().unwrap()
    };
    assert!(run(8) < run(2));
}

#[test]
fn odd_iteration_request_is_rounded_up() {
    // 3 requested sweeps run as 4, exactly like asking for 4.
    let run = |n| {
        let mut s = CpuSolver::new(poisson_problem(12, 12), SolverConfig::default()).unwrap();
        s.start(n).unwrap();
        s.current_solution().unwrap()
    };
    assert_eq!(run(3), run(4));
}

// ===== Fixed points =====

#[test]
fn all_inactive_grid_is_left_alone() {
    let sys = all_inactive(4, 4);
    let x0 = sys.x0.clone();
    let mut s = CpuSolver::new(sys, SolverConfig::default()).unwrap();
    assert_eq!(s.level_dimensions(), vec![(4, 4), (2, 2), (1, 1)]);
    for _ in 0..3 {
        s.start(5).unwrap();
    }
    assert_eq!(s.current_solution().unwrap(), x0);
    assert_eq!(s.average_residual().unwrap(), 0.0);
}

#[test]
fn unit_diagonal_solved_by_one_cycle() {
    let cfg = SolverConfig { jacobi_weight: 1.0, ..Default::default() };
    let sys = unit_diagonal(7, 5);
    let b = sys.b.clone();
    let mut s = CpuSolver::new(sys, cfg).unwrap();
    s.start(1).unwrap();
    assert_eq!(s.current_solution().unwrap().max_abs_diff(&b), 0.0);
    assert_eq!(s.average_residual().unwrap(), 0.0);
}

// ===== Scheduler state =====

#[test]
fn scheduler_returns_to_level_zero() {
    let cfg = SolverConfig::default();
    let mut h = GridHierarchy::new(&poisson_problem(16, 16), &NinePointStencil, cfg.reset_policy);
    let mut vc = VCycle::new();
    let mut backend = CpuBackend { hierarchy: &mut h, stencil: &NinePointStencil, config: &cfg };
    vc.run(&mut backend, 2).unwrap();
    assert_eq!(vc.current_level(), 0);
    assert_eq!(vc.deepest(), 4);
}

#[test]
fn retain_policy_keeps_coarse_unknowns_between_cycles() {
    let cfg = SolverConfig { reset_policy: ResetPolicy::Retain, ..Default::default() };
    let mut h = GridHierarchy::new(&poisson_problem(16, 16), &NinePointStencil, cfg.reset_policy);
    let mut vc = VCycle::new();
    {
        let mut backend = CpuBackend { hierarchy: &mut h, stencil: &NinePointStencil, config: &cfg };
        vc.run(&mut backend, 2).unwrap();
    }
    let coarse_after_one = h.level(1).solution().clone();
    assert!(coarse_after_one.mean_length() > 0.0);

    // A Retain reset clears only the residual.
    h.reset(1);
    assert_eq!(h.level(1).solution(), &coarse_after_one);
    assert_eq!(h.level(1).r.mean_length(), 0.0);

    let zero_cfg = SolverConfig::default();
    let mut hz = GridHierarchy::new(&poisson_problem(16, 16), &NinePointStencil, zero_cfg.reset_policy);
    {
        let mut backend = CpuBackend { hierarchy: &mut hz, stencil: &NinePointStencil, config: &zero_cfg };
        vc.run(&mut backend, 2).unwrap();
    }
    hz.reset(1);
    assert_eq!(hz.level(1).solution().mean_length(), 0.0);
}
