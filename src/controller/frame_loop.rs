use tracing::{debug, trace};

use crate::config::FrameConfig;

/// The per-frame work, called by [`FrameLoop::tick`] in declaration order.
pub trait FrameStages {
    fn step_physics(&mut self);
    fn update_character(&mut self, dt: f32);
    fn update_animation(&mut self, dt: f32);
    fn update_camera(&mut self);
    fn render(&mut self);
}

/// Monotonic time source in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        /// `performance.now()` of the page.
        pub struct SystemClock {
            performance: Option<web_sys::Performance>,
        }

        impl SystemClock {
            pub fn new() -> Self {
                Self { performance: web_sys::window().and_then(|w| w.performance()) }
            }
        }

        impl Clock for SystemClock {
            fn now(&self) -> f64 {
                self.performance.as_ref().map(|p| p.now() / 1000.0).unwrap_or(0.0)
            }
        }
    } else {
        use std::time::Instant;

        pub struct SystemClock {
            start: Instant,
        }

        impl SystemClock {
            pub fn new() -> Self {
                Self { start: Instant::now() }
            }
        }

        impl Clock for SystemClock {
            fn now(&self) -> f64 {
                self.start.elapsed().as_secs_f64()
            }
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Variable-timestep driver. Measures the delta between ticks and runs the
/// stages in their fixed order until disposed.
#[derive(Debug)]
pub struct FrameLoop {
    max_delta: f32,
    last: Option<f64>,
    frames: u64,
    cancelled: bool,
}

impl FrameLoop {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_delta: config.max_delta,
            last: None,
            frames: 0,
            cancelled: false,
        }
    }

    /// Seconds since the previous tick, clamped to `[0, max_delta]`. The
    /// first tick measures 0.
    fn delta(&mut self, now: f64) -> f32 {
        let dt = match self.last {
            Some(last) => (now - last).clamp(0.0, self.max_delta as f64) as f32,
            None => 0.0,
        };
        self.last = Some(now);
        dt
    }

    /// Run one frame at time `now`. Returns the delta used, or `None` once
    /// disposed.
    pub fn tick(&mut self, now: f64, stages: &mut impl FrameStages) -> Option<f32> {
        if self.cancelled {
            return None;
        }
        let dt = self.delta(now);
        self.frames += 1;
        trace!(frame = self.frames, dt, "tick");

        stages.step_physics();
        stages.update_character(dt);
        stages.update_animation(dt);
        stages.update_camera();
        stages.render();
        Some(dt)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Stop for good. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if !self.cancelled {
            debug!(frames = self.frames, "frame loop disposed");
        }
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl FrameStages for Recorder {
        fn step_physics(&mut self) {
            self.calls.push("physics".into());
        }
        fn update_character(&mut self, dt: f32) {
            self.calls.push(format!("character {dt:.3}"));
        }
        fn update_animation(&mut self, dt: f32) {
            self.calls.push(format!("animation {dt:.3}"));
        }
        fn update_camera(&mut self) {
            self.calls.push("camera".into());
        }
        fn render(&mut self) {
            self.calls.push("render".into());
        }
    }

    #[test]
    fn stages_run_in_fixed_order() {
        let mut frame_loop = FrameLoop::new(&FrameConfig::default());
        let mut recorder = Recorder::default();
        frame_loop.tick(1.0, &mut recorder);
        frame_loop.tick(1.016, &mut recorder);

        assert_eq!(
            recorder.calls,
            vec![
                "physics", "character 0.000", "animation 0.000", "camera", "render",
                "physics", "character 0.016", "animation 0.016", "camera", "render",
            ]
        );
    }

    #[test]
    fn delta_is_clamped() {
        let mut frame_loop = FrameLoop::new(&FrameConfig::default());
        let mut recorder = Recorder::default();
        assert_eq!(frame_loop.tick(0.0, &mut recorder), Some(0.0));
        assert_eq!(frame_loop.tick(5.0, &mut recorder), Some(0.1));
        // clock going backwards never yields a negative step
        assert_eq!(frame_loop.tick(4.0, &mut recorder), Some(0.0));
    }

    #[test]
    fn no_ticks_after_dispose() {
        let mut frame_loop = FrameLoop::new(&FrameConfig::default());
        let mut recorder = Recorder::default();
        frame_loop.tick(0.0, &mut recorder);
        frame_loop.dispose();
        frame_loop.dispose();

        assert_eq!(frame_loop.tick(0.1, &mut recorder), None);
        assert_eq!(recorder.calls.len(), 5);
        assert_eq!(frame_loop.frames(), 1);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
