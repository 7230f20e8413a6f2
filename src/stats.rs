//! Session statistics collected once per capture callback.

use std::collections::VecDeque;
use std::time::Instant;

/// Capacity of the inter-callback interval ring.
const INTERVAL_RING_CAPACITY: usize = 100;

/// Minimum number of recorded intervals before stability is judged.
const STABILITY_MIN_SAMPLES: usize = 10;

/// Maximum deviation from the mean interval, as a fraction of the mean,
/// before the session is classified unstable.
const STABILITY_DEVIATION_LIMIT: f64 = 0.5;

/// Timing regularity of the capture callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Callback intervals are within 50% of their mean.
    Stable,
    /// At least one interval deviated from the mean by more than 50%.
    Unstable,
}

/// Counters and timing aggregates for one routing session.
///
/// Updated once per capture callback and reset on session start/stop and
/// on any sample-rate or block-size change (those invalidate the numbers'
/// meaning). All time-derived metrics take `now` explicitly so they can be
/// computed deterministically in tests.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    start_time: Option<Instant>,
    total_frames: u64,
    total_callbacks: u64,
    errors: u64,
    bytes_processed: u64,
    last_callback: Option<Instant>,
    intervals: VecDeque<f64>,
}

impl StreamStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything back to the pre-session state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Marks the session start. Implies a reset.
    pub fn start(&mut self, now: Instant) {
        self.reset();
        self.start_time = Some(now);
    }

    /// Records one callback invocation.
    ///
    /// `bytes_processed` grows by `frames * channels * bytes_per_sample`,
    /// and the wall-clock delta since the previous callback joins the
    /// fixed-capacity interval ring.
    pub fn record_callback(&mut self, frames: u32, channels: u16, bytes_per_sample: u32, now: Instant) {
        self.total_callbacks += 1;
        self.total_frames += u64::from(frames);
        self.bytes_processed +=
            u64::from(frames) * u64::from(channels) * u64::from(bytes_per_sample);

        if let Some(last) = self.last_callback {
            if self.intervals.len() == INTERVAL_RING_CAPACITY {
                self.intervals.pop_front();
            }
            self.intervals
                .push_back(now.duration_since(last).as_secs_f64());
        }
        self.last_callback = Some(now);
    }

    /// Counts one recovered error (stream interruption or channel failure).
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Zeroes the error counter, keeping the rest of the session intact.
    pub fn clear_errors(&mut self) {
        self.errors = 0;
    }

    /// Total frames routed this session.
    #[must_use]
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Total callback invocations this session.
    #[must_use]
    pub fn total_callbacks(&self) -> u64 {
        self.total_callbacks
    }

    /// Recovered error count this session.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Total bytes that passed through the processing chain.
    #[must_use]
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Mean callback rate since session start, in callbacks per second.
    #[must_use]
    pub fn callbacks_per_second(&self, now: Instant) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let elapsed = now.duration_since(start).as_secs_f64();
        if elapsed > 0.0 {
            self.total_callbacks as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Mean data throughput since session start, in MB per second.
    #[must_use]
    pub fn throughput_mbps(&self, now: Instant) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let elapsed = now.duration_since(start).as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_processed as f64 / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Classifies callback timing regularity.
    ///
    /// Reports [`Stability::Stable`] until more than ten intervals have
    /// been observed; after that, any interval deviating from the mean by
    /// more than half the mean flips the classification.
    #[must_use]
    pub fn stability(&self) -> Stability {
        if self.intervals.len() <= STABILITY_MIN_SAMPLES {
            return Stability::Stable;
        }
        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        if mean <= 0.0 {
            return Stability::Stable;
        }
        let max_deviation = self
            .intervals
            .iter()
            .map(|i| (i - mean).abs())
            .fold(0.0, f64::max);
        if max_deviation > mean * STABILITY_DEVIATION_LIMIT {
            Stability::Unstable
        } else {
            Stability::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hundred_callbacks_exact_totals() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        for i in 0..100u32 {
            let now = start + Duration::from_millis(u64::from(i) * 5);
            stats.record_callback(256, 2, 4, now);
        }

        assert_eq!(stats.total_callbacks(), 100);
        assert_eq!(stats.total_frames(), 100 * 256);
        assert_eq!(stats.bytes_processed(), 100 * 256 * 2 * 4);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stats = StreamStats::new();
        stats.start(Instant::now());
        stats.record_callback(256, 2, 4, Instant::now());
        stats.record_error();

        stats.reset();
        assert_eq!(stats.total_callbacks(), 0);
        assert_eq!(stats.total_frames(), 0);
        assert_eq!(stats.errors(), 0);
        assert_eq!(stats.bytes_processed(), 0);
    }

    #[test]
    fn test_callbacks_per_second() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        for i in 1..=20u64 {
            stats.record_callback(256, 2, 4, start + Duration::from_millis(i * 100));
        }

        let rate = stats.callbacks_per_second(start + Duration::from_secs(2));
        assert!((rate - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_stability_stable_with_regular_intervals() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        for i in 0..30u64 {
            stats.record_callback(256, 2, 4, start + Duration::from_millis(i * 10));
        }
        assert_eq!(stats.stability(), Stability::Stable);
    }

    #[test]
    fn test_stability_unstable_on_large_deviation() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        let mut t = start;
        for i in 0..30u64 {
            // One interval three times the usual length
            let step = if i == 15 { 30 } else { 10 };
            t += Duration::from_millis(step);
            stats.record_callback(256, 2, 4, t);
        }
        assert_eq!(stats.stability(), Stability::Unstable);
    }

    #[test]
    fn test_stability_stable_below_sample_threshold() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        // Wildly uneven, but too few samples to judge
        let mut t = start;
        for step in [1u64, 100, 2, 300, 5] {
            t += Duration::from_millis(step);
            stats.record_callback(256, 2, 4, t);
        }
        assert_eq!(stats.stability(), Stability::Stable);
    }

    #[test]
    fn test_interval_ring_is_bounded() {
        let mut stats = StreamStats::new();
        let start = Instant::now();
        stats.start(start);

        for i in 0..500u64 {
            stats.record_callback(256, 2, 4, start + Duration::from_millis(i * 10));
        }
        assert!(stats.intervals.len() <= 100);
    }
}
