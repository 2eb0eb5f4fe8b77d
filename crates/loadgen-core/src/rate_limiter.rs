//! Per-worker pacing towards a global operations-per-second target.

use std::time::{Duration, Instant};

/// Longest single pause, so a worker keeps noticing cancellation.
pub const MAX_PAUSE: Duration = Duration::from_millis(100);

/// Paces one worker. Each worker gets `target / total_workers` ops/sec.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    per_worker: Option<f64>,
    started: Instant,
}

impl RateLimiter {
    pub fn new(target_ops_per_second: Option<f64>, total_workers: usize) -> Self {
        let per_worker = target_ops_per_second
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|t| t / total_workers.max(1) as f64);
        Self {
            per_worker,
            started: Instant::now(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, 1)
    }

    pub fn per_worker_target(&self) -> Option<f64> {
        self.per_worker
    }

    /// Restart the pacing clock.
    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    /// Pause owed after `completed` operations, measured on the real clock.
    pub fn pause(&self, completed: u64) -> Option<Duration> {
        self.pause_for(completed, self.started.elapsed())
    }

    /// Pause owed after `completed` operations at `elapsed` since start,
    /// capped at [`MAX_PAUSE`]. Callers keep pausing until this returns
    /// `None`; a single capped pause does not settle a larger debt.
    pub fn pause_for(&self, completed: u64, elapsed: Duration) -> Option<Duration> {
        let per_worker = self.per_worker?;
        let expected = elapsed.as_secs_f64() * per_worker;
        let actual = completed as f64;
        if actual <= expected {
            return None;
        }
        let owed = Duration::from_secs_f64((actual - expected) / per_worker);
        if owed.is_zero() {
            return None;
        }
        Some(owed.min(MAX_PAUSE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_target_never_pauses() {
        let limiter = RateLimiter::unlimited();
        assert_eq!(limiter.pause_for(1_000_000, Duration::ZERO), None);
    }

    #[test]
    fn test_target_split_across_workers() {
        let limiter = RateLimiter::new(Some(1000.0), 4);
        assert_eq!(limiter.per_worker_target(), Some(250.0));
    }

    #[test]
    fn test_pause_is_capped() {
        let limiter = RateLimiter::new(Some(10.0), 1);
        // 50 ops at t=0 owes five seconds; only the cap is returned
        assert_eq!(limiter.pause_for(50, Duration::ZERO), Some(MAX_PAUSE));
        assert_eq!(limiter.pause_for(1, Duration::from_millis(50)), Some(Duration::from_millis(50)));
        assert_eq!(limiter.pause_for(1, Duration::from_millis(200)), None);
    }

    /// Drives a worker doing instantaneous operations on a simulated clock.
    fn simulate(target: f64, workers: usize, duration: Duration) -> (u64, Duration) {
        let limiter = RateLimiter::new(Some(target), workers);
        let mut now = Duration::ZERO;
        let mut completed = 0u64;
        let mut longest = Duration::ZERO;
        while now < duration {
            completed += 1;
            while let Some(pause) = limiter.pause_for(completed, now) {
                longest = longest.max(pause);
                now += pause;
            }
        }
        (completed, longest)
    }

    #[test]
    fn test_simulated_single_worker_hits_target() {
        let (completed, longest) = simulate(100.0, 1, Duration::from_secs(2));
        assert!((180..=220).contains(&completed), "completed {completed}");
        assert!(longest <= MAX_PAUSE);
    }

    #[test]
    fn test_simulated_low_share_is_not_overshot() {
        // 10 ops/s over four workers is 2.5 ops/s each, well below one
        // operation per capped pause
        let (completed, longest) = simulate(10.0, 4, Duration::from_secs(10));
        assert!((24..=27).contains(&completed), "completed {completed}");
        assert!(longest <= MAX_PAUSE);
    }

    #[test]
    fn test_simulated_batches_below_cap() {
        let limiter = RateLimiter::new(Some(20.0), 1);
        let mut now = Duration::ZERO;
        let mut completed = 0u64;
        while now < Duration::from_secs(5) {
            // one pipeline of ten per unit of work
            completed += 10;
            while let Some(pause) = limiter.pause_for(completed, now) {
                now += pause;
            }
        }
        assert!((100..=110).contains(&completed), "completed {completed}");
    }

    #[test]
    fn test_simulated_worker_share() {
        // one of four workers sharing 400 ops/s runs at 100 ops/s
        let (completed, _) = simulate(400.0, 4, Duration::from_secs(10));
        assert!((950..=1050).contains(&completed), "completed {completed}");
    }
}
