use std::time::{Duration, Instant};

/// Scoped wall-clock stopwatch. Started at construction, read on demand.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic() {
        let timer = Timer::start();
        let first = timer.elapsed();
        let second = timer.elapsed();
        assert!(second >= first);
        assert!(timer.elapsed_secs() >= 0.0);
    }
}
