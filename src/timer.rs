//! Latency and throughput instrumentation.

use std::fmt;
use std::time::{Duration, Instant};

use itertools::Itertools;

/// Measures the average and worst-case time an operation takes.
///
/// [`FpsCounter::tick_with`] resets the recorded timings after logging them, so a periodic log
/// line shows per-interval statistics.
pub struct Timer {
    name: &'static str,
    samples: u32,
    total: Duration,
    worst: Duration,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            samples: 0,
            total: Duration::ZERO,
            worst: Duration::ZERO,
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&mut self, timee: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = timee();
        self.record(start.elapsed());
        result
    }

    fn record(&mut self, duration: Duration) {
        self.samples += 1;
        self.total += duration;
        self.worst = self.worst.max(duration);
    }

    /// Clears the recorded statistics.
    pub fn reset(&mut self) {
        *self = Timer::new(self.name);
    }
}

/// Displays the recorded statistics and resets them.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.samples == 0 {
            return write!(f, "{}: -", self.name);
        }

        let avg_ms = self.total.as_secs_f32() * 1000.0 / self.samples as f32;
        let worst_ms = self.worst.as_secs_f32() * 1000.0;
        write!(
            f,
            "{}: {}x{avg_ms:.01}ms (worst {worst_ms:.01}ms)",
            self.name, self.samples
        )
    }
}

/// Logs frames per second, with optional extra data.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS if one second has passed.
    pub fn tick(&mut self) {
        self.frames += 1;
        if self.start.elapsed() > Duration::from_secs(1) {
            log::debug!("{}: {} FPS", self.name, self.frames);
            self.restart();
        }
    }

    /// Like [`FpsCounter::tick`], but includes (and resets) the given timers in the log line.
    pub fn tick_with<'a>(&mut self, timers: impl IntoIterator<Item = &'a mut Timer>) {
        self.frames += 1;
        if self.start.elapsed() > Duration::from_secs(1) {
            let mut stats = timers.into_iter().map(|t| {
                let line = t.to_string();
                t.reset();
                line
            });
            log::debug!("{}: {} FPS ({})", self.name, self.frames, stats.join(", "));
            self.restart();
        }
    }

    fn restart(&mut self) {
        self.frames = 0;
        self.start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_display_resets() {
        let mut timer = Timer::new("op");
        assert_eq!(timer.to_string(), "op: -");

        timer.time(|| std::thread::sleep(Duration::from_millis(1)));
        let line = timer.to_string();
        assert!(line.starts_with("op: 1x"), "{line}");
    }
}
