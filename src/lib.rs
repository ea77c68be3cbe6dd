// poissonviz: real-time seamless cloning on a GPU geometric multigrid
// Poisson solver.
//
// CPU reference operators live at the top level; the wgpu implementation
// in `gpu` mirrors them kernel for kernel.
//
// Reference: Pérez, Gangnet, Blake, "Poisson Image Editing" (SIGGRAPH 2003)

pub mod config;
pub mod error;
pub mod field;
pub mod pingpong;
pub mod stencil;
pub mod system;

pub mod level;
pub mod hierarchy;
pub mod smoother;
pub mod residual;
pub mod transfer;
pub mod vcycle;
pub mod solver;

pub mod assembler;
pub mod governor;

pub mod gpu;

#[doc(hidden)]
pub mod testing;

pub use config::{DevicePreference, ResetPolicy, SolverConfig, WorkgroupSize};
pub use error::{ConfigError, DeviceError, DeviceResult};
pub use field::{Field, Texel};
pub use solver::{CpuSolver, Solver};
pub use system::{LinearSystem, Offset, SystemAssembler};
