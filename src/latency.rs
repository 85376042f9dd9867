use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_WINDOW_SIZE: usize = 60;

static WINDOW_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_WINDOW_SIZE);

/// Sets the process-wide sample window used by every timer constructed via
/// [`RollingLatencyTimer::new`]. Must be called once at startup, before the
/// first server joins the fleet; timers built earlier keep their old size.
pub fn set_window_size(size: usize) {
    WINDOW_SIZE.store(size.max(1), Ordering::Relaxed);
}

pub fn window_size() -> usize {
    WINDOW_SIZE.load(Ordering::Relaxed)
}

/// Fixed-capacity ring of the most recent latency samples with an O(1)
/// moving average.
///
/// The average always divides by the full capacity, not by the number of
/// samples seen so far: unwritten slots count as zero, so a server that just
/// joined the fleet starts out looking fast and only converges to its real
/// latency as the window fills. One timer is owned and written by exactly
/// one telemetry path, so no locking happens here.
#[derive(Debug, Clone)]
pub struct RollingLatencyTimer {
    samples: Vec<f64>,
    total: f64,
    cursor: usize,
}

impl RollingLatencyTimer {
    pub fn new() -> Self {
        Self::with_capacity(window_size())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            total: 0.0,
            cursor: 0,
        }
    }

    /// Overwrites the oldest slot, keeping `total == Σ(samples)`.
    pub fn append(&mut self, sample: f64) {
        self.total -= self.samples[self.cursor];
        self.samples[self.cursor] = sample;
        self.total += sample;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    pub fn average(&self) -> f64 {
        self.total / self.samples.len() as f64
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }
}

impl Default for RollingLatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_divides_by_capacity_while_filling() {
        let mut timer = RollingLatencyTimer::with_capacity(4);
        assert_eq!(0.0, timer.average());

        timer.append(8.0);
        assert!((timer.average() - 2.0).abs() < f64::EPSILON);

        timer.append(4.0);
        assert!((timer.average() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn average_tracks_the_last_capacity_samples() {
        let mut timer = RollingLatencyTimer::with_capacity(3);
        for sample in [1.0, 2.0, 3.0, 10.0, 20.0] {
            timer.append(sample);
        }

        // Window now holds [10, 20, 3].
        assert!((timer.average() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn constant_samples_converge_to_the_constant() {
        let mut timer = RollingLatencyTimer::with_capacity(60);
        for _ in 0..100 {
            timer.append(40.0);
        }

        assert!((timer.average() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn rolling_sum_matches_recomputed_sum() {
        let mut timer = RollingLatencyTimer::with_capacity(7);
        let samples: Vec<f64> = (0..23).map(|i| (i * i) as f64 * 0.5).collect();

        for (n, sample) in samples.iter().enumerate() {
            timer.append(*sample);

            let tail = samples[..=n].iter().rev().take(7).sum::<f64>();
            assert!((timer.average() - tail / 7.0).abs() < 1e-9);
        }
    }
}
