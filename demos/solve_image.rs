// demos/solve_image.rs — Offline seamless cloning of two image files.
//
// Runs a fixed number of V-cycles and writes the composite as PNG. The
// average residual is printed after every cycle, so this doubles as a
// convergence check on real images.
//
// USAGE
// ─────
//   cargo run --release --example solve_image -- \
//       --source patch.png --target photo.jpg --x 120 --y 80 --out clone.png
//   cargo run --release --example solve_image -- --cpu --cycles 40 ...
//   cargo run --release --example solve_image -- --out synthetic.png   # built-in images

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use poissonviz::assembler::SeamlessCloneAssembler;
use poissonviz::config::SolverConfig;
use poissonviz::field::Field;
use poissonviz::gpu::{ComputeContext, GpuSolver};
use poissonviz::solver::{CpuSolver, Solver};
use poissonviz::testing::clone_images;

#[derive(Parser, Debug)]
#[command(name = "solve_image", about = "Seamless cloning of an image patch")]
struct Args {
    /// Source patch; its alpha channel is the clone mask.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Target image.
    #[arg(long)]
    target: Option<PathBuf>,

    /// Patch position in the target.
    #[arg(long, default_value_t = 0)]
    x: i32,

    #[arg(long, default_value_t = 0)]
    y: i32,

    /// Number of V-cycles.
    #[arg(long, default_value_t = 20)]
    cycles: u32,

    /// Jacobi sweeps per level and direction.
    #[arg(long, default_value_t = 10)]
    sweeps: u32,

    /// JSON file with `SolverConfig` fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the CPU reference solver.
    #[arg(long)]
    cpu: bool,

    /// Output PNG.
    #[arg(long, default_value = "clone.png")]
    out: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => {
            let config: SolverConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            config.validate()?;
            config
        }
        None => SolverConfig::default(),
    };
    let (source, target) = match (&args.source, &args.target) {
        (Some(s), Some(t)) => (load_rgba(s)?, load_rgba(t)?),
        (None, None) => clone_images(129, 512),
        _ => return Err("--source and --target must be given together".into()),
    };
    let assembler = SeamlessCloneAssembler::new(source, target);

    let solution = if args.cpu {
        let mut solver = CpuSolver::new(assembler.clone(), config)?;
        solve(&mut solver, args)?
    } else {
        let ctx = ComputeContext::new(&config)?;
        info!("GPU: {ctx}");
        let mut solver = GpuSolver::new(&ctx, assembler.clone(), config)?;
        solve(&mut solver, args)?
    };

    let out = assembler.composite(&solution, poissonviz::Offset::new(args.x, args.y));
    let (w, h) = out.dims();
    image::save_buffer(&args.out, &out.to_rgba8(), w as u32, h as u32, image::ColorType::Rgba8)?;
    info!("wrote {}", args.out.display());
    Ok(())
}

fn solve(solver: &mut dyn Solver, args: &Args) -> Result<Field, Box<dyn Error>> {
    solver.set_offset(args.x, args.y)?;
    solver.rebuild(true)?;
    info!("levels: {:?}", solver.level_dimensions());

    let initial = solver.average_residual()?;
    info!("cycle   0  residual {initial:.3e}");
    let t0 = Instant::now();
    for cycle in 1..=args.cycles {
        solver.start(args.sweeps)?;
        solver.wait()?;
        let avg = solver.average_residual()?;
        info!("cycle {cycle:3}  residual {avg:.3e}  ({:.1e} of initial)", avg / initial.max(f32::MIN_POSITIVE));
    }
    info!("{} cycles in {:.1} ms", args.cycles, t0.elapsed().as_secs_f64() * 1e3);
    Ok(solver.current_solution()?)
}

fn load_rgba(path: &Path) -> Result<Field, Box<dyn Error>> {
    let img = image::open(path)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Ok(Field::from_rgba8(w as usize, h as usize, img.as_raw()))
}
