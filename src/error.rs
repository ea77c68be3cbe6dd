// error.rs — Error taxonomy for device and configuration failures.
//
// Every call that touches the GPU returns `Result<T, DeviceError>`. All
// variants are fatal to a solving session: the caller logs the error and
// exits (see demos/live_clone.rs). The one recoverable condition, falling
// back from a hardware GPU to a software adapter, is not an error at all;
// `ComputeContext::new` logs it at warn level and carries on.

use crate::config::WorkgroupSize;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    /// No adapter at all, not even a software one.
    #[error("no compute adapter available (not even a software fallback)")]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("workgroup size {total} exceeds adapter limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    #[error("{groups} workgroups in one dimension exceed adapter limit of {max}")]
    TooManyWorkgroups { groups: u32, max: u32 },

    /// Shader compilation or pipeline creation failed. `log` is the
    /// validation message wgpu produced.
    #[error("kernel build failed for `{label}`:\n{log}")]
    KernelBuild { label: String, log: String },

    #[error("out of device memory while allocating `{label}`")]
    OutOfMemory { label: String },

    /// Any other error captured by a wgpu error scope.
    #[error("device validation error: {0}")]
    Validation(String),

    #[error("buffer map failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    /// The map callback was dropped without firing (device lost).
    #[error("readback callback dropped before completion")]
    CallbackDropped,

    #[error("dimension mismatch: expected {}×{}, got {}×{}", expected.0, expected.1, got.0, got.1)]
    DimensionMismatch { expected: (usize, usize), got: (usize, usize) },

    /// The shared presentation images are held by the other side.
    #[error("shared images are held by the {holder}")]
    SharedImageBusy { holder: &'static str },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl DeviceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Out-of-range `SolverConfig` values.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("jacobi_weight must be in (0, 1], got {0}")]
    JacobiWeight(f32),

    #[error("correction_weight must be finite and positive, got {0}")]
    CorrectionWeight(f32),

    #[error("reduction needs at least one group and one thread, got {groups}×{threads}")]
    Reduction { groups: u32, threads: u32 },

    #[error("workgroup dimensions must be non-zero, got {0}")]
    Workgroup(WorkgroupSize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = DeviceError::KernelBuild { label: "jacobi".into(), log: "bad token".into() };
        let msg = e.to_string();
        assert!(msg.contains("jacobi") && msg.contains("bad token"));

        let e = DeviceError::DimensionMismatch { expected: (4, 4), got: (2, 3) };
        assert_eq!(e.to_string(), "dimension mismatch: expected 4×4, got 2×3");

        let e = DeviceError::SharedImageBusy { holder: "presentation side" };
        assert!(e.to_string().contains("presentation side"));
    }

    #[test]
    fn test_config_error_converts() {
        let e: DeviceError = ConfigError::JacobiWeight(2.0).into();
        assert!(e.to_string().starts_with("invalid configuration"));
    }
}
