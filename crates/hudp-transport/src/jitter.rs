//! # Interarrival Jitter
//!
//! RFC 3550 §6.4.1 estimator. For consecutive packets `i-1, i` with local
//! arrival times `A` and remote send timestamps `T`:
//!
//! ```text
//! D = (A_i - A_{i-1}) - (T_i - T_{i-1})
//! J = J + (|D| - J) / 16
//! ```
//!
//! All quantities are milliseconds. The local timeline can have any origin
//! since only differences are used.

/// Fixed EWMA gain denominator.
pub const JITTER_DIVISOR: f64 = 16.0;

#[derive(Debug, Clone, Copy)]
struct Sample {
    arrival_ms: f64,
    remote_ms: u64,
}

/// Smoothed interarrival jitter.
#[derive(Debug, Clone, Default)]
pub struct JitterEstimator {
    last: Option<Sample>,
    jitter_ms: f64,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one arrival. The first call only seeds the previous sample and
    /// returns `None`; later calls return the updated estimate.
    pub fn update(&mut self, arrival_ms: f64, remote_ms: u64) -> Option<f64> {
        let prev = self.last.replace(Sample {
            arrival_ms,
            remote_ms,
        })?;

        let local_delta = arrival_ms - prev.arrival_ms;
        let remote_delta = remote_ms as f64 - prev.remote_ms as f64;
        let d = local_delta - remote_delta;
        self.jitter_ms += (d.abs() - self.jitter_ms) / JITTER_DIVISOR;
        Some(self.jitter_ms)
    }

    /// Current estimate in milliseconds (0 until two samples were seen).
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.jitter_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_only_seeds() {
        let mut j = JitterEstimator::new();
        assert_eq!(j.update(10.0, 1_000), None);
        assert_eq!(j.jitter_ms(), 0.0);
    }

    #[test]
    fn exact_ewma_sequence() {
        // Constant remote timestamps, arrivals at 10, 12, 8 ms → D = 2, then -4.
        let mut j = JitterEstimator::new();
        assert_eq!(j.update(10.0, 500), None);

        let j1 = j.update(12.0, 500).unwrap();
        assert_eq!(j1, 0.125);

        let j2 = j.update(8.0, 500).unwrap();
        assert_eq!(j2, 0.125 + (4.0 - 0.125) / 16.0);
        assert_eq!(j2, 0.3671875);
    }

    #[test]
    fn perfectly_paced_stream_has_no_jitter() {
        let mut j = JitterEstimator::new();
        for i in 0..50u64 {
            j.update(100.0 + i as f64 * 20.0, 1_000_000 + i * 20);
        }
        assert_eq!(j.jitter_ms(), 0.0);
    }

    #[test]
    fn remote_clock_offset_cancels_out() {
        let mut a = JitterEstimator::new();
        let mut b = JitterEstimator::new();
        let arrivals = [0.0, 21.0, 39.0, 64.0];
        let sent = [0u64, 20, 40, 60];
        for (arr, ts) in arrivals.iter().zip(sent) {
            a.update(*arr, ts);
            b.update(*arr, ts + 1_700_000_000_000);
        }
        assert_eq!(a.jitter_ms(), b.jitter_ms());
        assert!(a.jitter_ms() > 0.0);
    }

    #[test]
    fn reordered_remote_timestamps_use_magnitude() {
        let mut j = JitterEstimator::new();
        j.update(0.0, 100);
        // Packet sent earlier arrives later: D = 10 - (-10) = 20.
        let v = j.update(10.0, 90).unwrap();
        assert_eq!(v, 20.0 / 16.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut j = JitterEstimator::new();
        j.update(0.0, 0);
        j.update(50.0, 0);
        j.reset();
        assert_eq!(j.jitter_ms(), 0.0);
        assert_eq!(j.update(1.0, 1), None);
    }
}
