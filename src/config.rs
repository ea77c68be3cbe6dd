// config.rs — Solver tuning knobs.
//
// One plain struct with a `Default` impl, passed by value into the solver
// constructors. Everything derives serde so demos can load a JSON file and
// override individual fields (`#[serde(default)]` fills the rest).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stencil::Stencil;

/// What happens to a coarse level's unknowns before each coarse solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Zero `x` and `r`: every coarse solve starts from the zero correction.
    #[default]
    Zero,
    /// Keep last cycle's coarse `x` as a warm start; only `r` is cleared.
    Retain,
}

/// Adapter preference handed to wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<DevicePreference> for wgpu::PowerPreference {
    fn from(p: DevicePreference) -> Self {
        match p {
            DevicePreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            DevicePreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

/// A workgroup size for 2D compute dispatches.
///
/// Substituted into the shader text at the `{{WG_X}}` / `{{WG_Y}}`
/// placeholders when the kernels are built. naga does not accept override
/// constants in `@workgroup_size`, so each size compiles its own module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Number of workgroups needed to cover `w × h` (ceiling division).
    pub fn dispatch(&self, w: u32, h: u32) -> (u32, u32) {
        (w.div_ceil(self.x), h.div_ceil(self.y))
    }
}

impl Default for WorkgroupSize {
    /// 16×8 = 128 invocations: four 32-wide warps or two 64-wide wavefronts.
    fn default() -> Self {
        WorkgroupSize { x: 16, y: 8 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Multigrid solver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Jacobi damping ω in `x += ω (b - A x) / diag`.
    pub jacobi_weight: f32,
    /// Scale applied to the restricted residual before it becomes the
    /// coarse right-hand side. `None` takes the stencil's `coarse_scale`.
    pub correction_weight: Option<f32>,
    /// Coarse-level reset behaviour between V-cycles.
    pub reset_policy: ResetPolicy,
    /// Workgroups launched by the residual reduction (partial sums).
    pub reduction_groups: u32,
    /// Threads per reduction workgroup, substituted into
    /// shaders/reduce.wgsl at kernel build time.
    pub reduction_threads: u32,
    /// 2D workgroup shape for every per-pixel kernel.
    pub workgroup: WorkgroupSize,
    /// GPU adapter preference.
    pub device_preference: DevicePreference,
    /// Lower bound on sweeps per level after even rounding.
    pub min_sweeps: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            jacobi_weight: 0.8,
            correction_weight: None,
            reset_policy: ResetPolicy::Zero,
            reduction_groups: 64,
            reduction_threads: 16,
            workgroup: WorkgroupSize::default(),
            device_preference: DevicePreference::HighPerformance,
            min_sweeps: 2,
        }
    }
}

impl SolverConfig {
    /// Check value ranges. Called by every solver constructor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.jacobi_weight > 0.0 && self.jacobi_weight <= 1.0) {
            return Err(ConfigError::JacobiWeight(self.jacobi_weight));
        }
        if let Some(w) = self.correction_weight {
            if !(w.is_finite() && w > 0.0) {
                return Err(ConfigError::CorrectionWeight(w));
            }
        }
        if self.reduction_groups == 0 || self.reduction_threads == 0 {
            return Err(ConfigError::Reduction {
                groups: self.reduction_groups,
                threads: self.reduction_threads,
            });
        }
        if self.workgroup.x == 0 || self.workgroup.y == 0 {
            return Err(ConfigError::Workgroup(self.workgroup));
        }
        Ok(())
    }

    /// The restricted-residual scale in effect for `stencil`.
    pub fn correction_weight_for(&self, stencil: &dyn Stencil) -> f32 {
        self.correction_weight.unwrap_or_else(|| stencil.coarse_scale())
    }

    /// Round a requested iteration count to the nearest even number,
    /// never below `min_sweeps`.
    ///
    /// Even counts leave the ping-pong selector where it started, so the
    /// nominal front buffer after a batch is predictable.
    pub fn even_sweeps(&self, requested: u32) -> u32 {
        let rounded = ((requested + 1) / 2) * 2;
        let floor = self.min_sweeps + (self.min_sweeps & 1);
        rounded.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SolverConfig::default().validate().unwrap();
    }

    #[test]
    fn test_even_sweeps_rounding() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.even_sweeps(0), 2);
        assert_eq!(cfg.even_sweeps(1), 2);
        assert_eq!(cfg.even_sweeps(2), 2);
        assert_eq!(cfg.even_sweeps(3), 4);
        assert_eq!(cfg.even_sweeps(4), 4);
        assert_eq!(cfg.even_sweeps(9), 10);
    }

    #[test]
    fn test_even_sweeps_odd_minimum_rounds_up() {
        let cfg = SolverConfig { min_sweeps: 3, ..Default::default() };
        assert_eq!(cfg.even_sweeps(1), 4);
    }

    #[test]
    fn test_rejects_bad_jacobi_weight() {
        let cfg = SolverConfig { jacobi_weight: 1.5, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::JacobiWeight(_))));
    }

    #[test]
    fn test_correction_weight_defaults_to_stencil_scale() {
        use crate::stencil::NinePointStencil;
        let cfg = SolverConfig::default();
        assert_eq!(cfg.correction_weight_for(&NinePointStencil), 4.0);
        let cfg = SolverConfig { correction_weight: Some(1.5), ..Default::default() };
        assert_eq!(cfg.correction_weight_for(&NinePointStencil), 1.5);
    }

    #[test]
    fn test_rejects_bad_correction_weight() {
        for w in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let cfg = SolverConfig { correction_weight: Some(w), ..Default::default() };
            assert!(matches!(cfg.validate(), Err(ConfigError::CorrectionWeight(_))), "{w}");
        }
    }

    #[test]
    fn test_dispatch_ceiling() {
        let ws = WorkgroupSize { x: 8, y: 8 };
        assert_eq!(ws.dispatch(100, 100), (13, 13));
        assert_eq!(ws.dispatch(752, 480), (94, 60));
        assert_eq!(WorkgroupSize::default().dispatch(1, 1), (1, 1));
    }
}
