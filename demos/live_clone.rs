// demos/live_clone.rs — Interactive seamless cloning.
//
// Pastes a masked source patch into a target image and keeps solving the
// Poisson system while the patch is dragged around. One V-cycle runs per
// frame; the sweep count per level follows the frame rate.
//
//   ┌───────────────────────────────┐
//   │ target                        │
//   │        ┌───────┐              │
//   │        │ patch │ ← drag       │
//   │        └───────┘              │
//   └───────────────────────────────┘
//
// USAGE
// ─────
//   cargo run --release --example live_clone                       # synthetic images
//   cargo run --release --example live_clone -- \
//       --source patch.png --target photo.jpg                      # alpha of patch.png is the mask
//   cargo run --release --example live_clone -- --cpu --config solver.json
//
// CONTROLS
// ────────
//   mouse drag   — move the patch (its centre follows the cursor)
//   arrows       — move by 1 px (with Shift: 10 px)
//   Space        — pause/resume solving
//   R            — toggle residual view inside the patch
//   Q / Esc      — quit

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use log::{error, info};
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};

use poissonviz::assembler::SeamlessCloneAssembler;
use poissonviz::config::SolverConfig;
use poissonviz::field::{self, Field};
use poissonviz::governor::FrameRateGovernor;
use poissonviz::gpu::{ComputeContext, GpuSolver};
use poissonviz::solver::{CpuSolver, Solver};
use poissonviz::system::Offset;
use poissonviz::testing::clone_images;

/// Gain applied to the residual magnitude in residual view.
const RESIDUAL_GAIN: f32 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "live_clone", about = "Interactive Poisson seamless cloning")]
struct Args {
    /// Source patch; its alpha channel is the clone mask.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Target image the patch is pasted into.
    #[arg(long)]
    target: Option<PathBuf>,

    /// JSON file with `SolverConfig` fields; missing fields keep defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the CPU reference solver instead of the GPU one.
    #[arg(long)]
    cpu: bool,

    /// Initial patch position in the target.
    #[arg(long, default_value_t = 40)]
    x: i32,

    #[arg(long, default_value_t = 40)]
    y: i32,
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
    let config = load_config(args.config.as_deref())?;
    let (source, target) = load_images(args)?;
    info!(
        "patch {}×{}, target {}×{}",
        source.width(),
        source.height(),
        target.width(),
        target.height()
    );
    let assembler = SeamlessCloneAssembler::new(source, target);
    let start = Offset::new(args.x, args.y);

    if args.cpu {
        let mut solver = CpuSolver::new(assembler.clone(), config)?;
        solver.set_offset(start.dx, start.dy)?;
        solver.rebuild(true)?;
        frame_loop(&mut solver, &assembler, "CPU")
    } else {
        let ctx = ComputeContext::new(&config)?;
        let mut solver = GpuSolver::new(&ctx, assembler.clone(), config)?;
        info!("GPU: {}", solver.adapter_info());
        solver.set_offset(start.dx, start.dy)?;
        solver.rebuild(true)?;
        frame_loop(&mut solver, &assembler, "GPU")
    }
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn frame_loop(
    solver: &mut dyn Solver,
    assembler: &SeamlessCloneAssembler,
    backend: &str,
) -> Result<(), Box<dyn Error>> {
    let (tw, th) = assembler.target().dims();
    let (pw, ph) = assembler.source().dims();
    info!("levels: {:?}", solver.level_dimensions());

    let mut window = Window::new(
        &format!("live_clone ({backend})"),
        tw,
        th,
        WindowOptions { resize: false, ..WindowOptions::default() },
    )?;
    window.set_target_fps(0);

    let mut governor = FrameRateGovernor::new(Instant::now());
    let mut paused = false;
    let mut show_residual = false;
    let mut fb = vec![0u32; tw * th];

    while window.is_open() && !window.is_key_down(Key::Escape) && !window.is_key_down(Key::Q) {
        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            paused = !paused;
            info!("{}", if paused { "paused" } else { "solving" });
        }
        if window.is_key_pressed(Key::R, KeyRepeat::No) {
            show_residual = !show_residual;
        }

        let wanted = requested_offset(&window, solver.offset(), pw, ph);
        if wanted != solver.offset() {
            solver.set_offset(wanted.dx, wanted.dy)?;
        }

        if !paused {
            solver.start(governor.iterations())?;
        }
        solver.wait()?;

        let offset = solver.offset();
        let solution = solver.current_solution()?;
        let mut shown = assembler.composite(&solution, offset);
        if show_residual {
            let r = solver.current_residual()?;
            overlay_residual(&mut shown, &r, offset);
        }
        pack_argb(&shown, &mut fb);
        window.update_with_buffer(&fb, tw, th)?;

        if let Some(fps) = governor.record_frame(Instant::now()) {
            let avg = solver.average_residual()?;
            info!(
                "{fps:5.1} fps  {:3} sweeps/level  residual {avg:.3e}  offset {offset}",
                governor.iterations()
            );
        }
    }
    Ok(())
}

/// Offset the input asks for this frame: the cursor while the left button
/// is held, otherwise the current offset nudged by the arrow keys.
fn requested_offset(window: &Window, current: Offset, pw: usize, ph: usize) -> Offset {
    if window.get_mouse_down(MouseButton::Left) {
        if let Some((mx, my)) = window.get_mouse_pos(MouseMode::Clamp) {
            return Offset::new(mx as i32 - pw as i32 / 2, my as i32 - ph as i32 / 2);
        }
    }
    let step = if window.is_key_down(Key::LeftShift) || window.is_key_down(Key::RightShift) {
        10
    } else {
        1
    };
    let mut next = current;
    let pressed = |k| window.is_key_pressed(k, KeyRepeat::Yes);
    if pressed(Key::Left) {
        next.dx -= step;
    }
    if pressed(Key::Right) {
        next.dx += step;
    }
    if pressed(Key::Up) {
        next.dy -= step;
    }
    if pressed(Key::Down) {
        next.dy += step;
    }
    next
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<SolverConfig, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(SolverConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: SolverConfig = serde_json::from_str(&text)?;
    config.validate()?;
    info!("config from {}: {config:?}", path.display());
    Ok(config)
}

fn load_images(args: &Args) -> Result<(Field, Field), Box<dyn Error>> {
    match (&args.source, &args.target) {
        (Some(s), Some(t)) => Ok((load_rgba(s)?, load_rgba(t)?)),
        (None, None) => {
            info!("no images given, using synthetic patch and target");
            Ok(clone_images(129, 512))
        }
        _ => Err("--source and --target must be given together".into()),
    }
}

/// Any format the `image` crate reads, as `[0, 1]` RGBA.
fn load_rgba(path: &Path) -> Result<Field, Box<dyn Error>> {
    let img = image::open(path)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Ok(Field::from_rgba8(w as usize, h as usize, img.as_raw()))
}

/// Replace masked pixels of `shown` by the grey residual magnitude.
fn overlay_residual(shown: &mut Field, r: &Field, offset: Offset) {
    let (tw, th) = shown.dims();
    for (x, y, t) in r.texels() {
        let tx = x as i64 + i64::from(offset.dx);
        let ty = y as i64 + i64::from(offset.dy);
        if tx < 0 || ty < 0 || tx >= tw as i64 || ty >= th as i64 {
            continue;
        }
        let v = (field::length(t) * RESIDUAL_GAIN).clamp(0.0, 1.0);
        shown.set(tx as usize, ty as usize, [v, v, v, 1.0]);
    }
}

/// Pack `[0, 1]` RGBA texels into minifb's 0RGB u32 layout.
fn pack_argb(f: &Field, fb: &mut [u32]) {
    for (dst, t) in fb.iter_mut().zip(f.as_slice()) {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        *dst = (c(t[0]) << 16) | (c(t[1]) << 8) | c(t[2]);
    }
}
