// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports a rate once per window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    started: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            frames: 0,
            started: Instant::now(),
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Returns frames-per-second once `window` has elapsed since the last report.
    pub fn poll(&mut self, now: Instant) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.started = now;
        Some(fps)
    }

    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.started = now;
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_report_before_window_elapses() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let start = fps.started;
        fps.frame();
        assert_eq!(fps.poll(start + Duration::from_millis(500)), None);
    }

    #[test]
    fn reports_rate_and_restarts() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let start = fps.started;
        for _ in 0..120 {
            fps.frame();
        }
        let rate = fps.poll(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 60.0).abs() < 0.01);
        assert_eq!(fps.frames, 0);
        assert_eq!(fps.poll(start + Duration::from_millis(2500)), None);
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }
}
