// gpu/mod.rs — wgpu implementation of the multigrid solver.
//
// Every kernel mirrors a CPU operator in the parent crate, and the CPU
// operators stay the authoritative reference: GPU tests compare against
// them texel by texel.
//
//   context    adapter selection, device, error capture
//   field      Rgba32Float textures, upload and readback
//   kernels    multigrid.wgsl pipelines and the binding table
//   hierarchy  device levels, pre-built bind groups, V-cycle recording
//   reduce     two-stage mean residual magnitude
//   present    display images and the compute/presentation bracket
//   solver     GpuSolver, the asynchronous frame-loop controller
//
// The host never touches field contents during a V-cycle. The only
// per-frame host↔device traffic is the optional residual readback and the
// display image hand-off.

pub mod context;
pub mod field;
pub mod hierarchy;
pub mod kernels;
pub mod present;
pub mod reduce;
pub mod solver;

pub use context::{AdapterInfo, ComputeContext};
pub use field::GpuField;
pub use hierarchy::{GpuHierarchy, GpuLevel, GpuRecorder};
pub use kernels::{KernelParams, MultigridKernels};
pub use present::{DisplayImage, Holder, SharedImages};
pub use reduce::Reduction;
pub use solver::GpuSolver;

// ---- GPU test isolation -----------------------------------------------------
//
// Some drivers (software Vulkan in particular) crash or deadlock when
// several devices are created and dropped in one process. Each GPU test is
// therefore split in two:
//
//   inner_*  #[ignore]d, does the real work, prints GPU_TEST_OK last
//   test_*   #[ignore]d wrapper that runs exactly one inner test in a fresh
//            `cargo test` process and checks for the marker
//
// Run them with `cargo test -- --ignored test_`.

/// Run one `#[ignore]`d inner test in a child process and return its
/// combined stdout and stderr.
#[cfg(test)]
pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}
