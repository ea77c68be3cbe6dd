// governor.rs — Adapts relaxation work to the observed frame rate.
//
// The solver has no internal throttle: the only knob is how many sweeps a
// V-cycle does per level. Every 200 ms the governor compares the measured
// frame rate against a target and nudges the iteration count by the
// difference in frames per second, never going below a floor.

use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug, Clone)]
pub struct FrameRateGovernor {
    iterations: f64,
    target_fps: f64,
    floor: f64,
    window: Duration,
    window_start: Instant,
    frames: u32,
    last_fps: Option<f64>,
}

impl FrameRateGovernor {
    /// 10 iterations to start, 30 fps target, floor of 4, 200 ms window.
    pub fn new(now: Instant) -> Self {
        Self::with_target(now, 30.0, 10.0, 4.0)
    }

    pub fn with_target(now: Instant, target_fps: f64, initial: f64, floor: f64) -> Self {
        FrameRateGovernor {
            iterations: initial.max(floor),
            target_fps,
            floor,
            window: Duration::from_millis(200),
            window_start: now,
            frames: 0,
            last_fps: None,
        }
    }

    /// Iteration count to pass to `Solver::start` this frame.
    pub fn iterations(&self) -> u32 {
        self.iterations.round() as u32
    }

    /// Frame rate measured over the last complete window.
    pub fn fps(&self) -> Option<f64> {
        self.last_fps
    }

    /// Count one presented frame. Returns the new measured fps when a
    /// window closed on this frame.
    pub fn record_frame(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= self.window {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.iterations = (self.iterations + fps - self.target_fps).max(self.floor);
        debug!("fps {:.1}, iterations per level {:.1}", fps, self.iterations);
        self.window_start = now;
        self.frames = 0;
        self.last_fps = Some(fps);
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frames(g: &mut FrameRateGovernor, start: Instant, count: u32, every: Duration) -> Instant {
        let mut t = start;
        for _ in 0..count {
            t += every;
            g.record_frame(t);
        }
        t
    }

    #[test]
    fn test_fast_frames_raise_iterations() {
        let t0 = Instant::now();
        let mut g = FrameRateGovernor::new(t0);
        // 60 fps for a bit more than one window.
        run_frames(&mut g, t0, 13, Duration::from_micros(16_667));
        let fps = g.fps().unwrap();
        assert!(fps > 55.0 && fps < 65.0, "fps = {fps}");
        assert!(g.iterations() > 30);
    }

    #[test]
    fn test_slow_frames_hit_the_floor() {
        let t0 = Instant::now();
        let mut g = FrameRateGovernor::new(t0);
        run_frames(&mut g, t0, 3, Duration::from_millis(100));
        assert_eq!(g.iterations(), 4);
    }

    #[test]
    fn test_no_update_inside_window() {
        let t0 = Instant::now();
        let mut g = FrameRateGovernor::new(t0);
        assert_eq!(g.record_frame(t0 + Duration::from_millis(50)), None);
        assert_eq!(g.iterations(), 10);
        assert!(g.fps().is_none());
    }
}
