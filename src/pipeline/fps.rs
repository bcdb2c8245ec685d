use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Frame rate over consecutive one-second windows.
///
/// Reports the rate of the last completed window; 0.0 until one completes.
#[derive(Debug)]
pub struct FpsMeter {
    window_start: Instant,
    frames: u32,
    last: f32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            last: 0.0,
        }
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    /// Count one frame at `now`, returning the current rate.
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= WINDOW {
            self.last = self.frames as f32 / elapsed.as_secs_f32();
            self.window_start = now;
            self.frames = 0;
        }
        self.last
    }

    pub fn restart(&mut self) {
        *self = Self::new();
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
