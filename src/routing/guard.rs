//! Acoustic feedback detection on the capture signal.
//!
//! Feedback through a bidirectional device (a Bluetooth speaker whose
//! microphone re-captures its own output) manifests as self-similar,
//! escalating energy on the capture signal. The detector combines an
//! RMS-trend check with an autocorrelation pattern check: the trend alone
//! fires on ordinary crescendos, the correlation alone fires on steady
//! tones, but together they are a cheap, false-positive-resistant loop
//! heuristic that avoids cross-correlating against every output channel.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dsp;

/// Capacity of the rolling RMS history.
const HISTORY_CAPACITY: usize = 100;

/// History entries required before any evaluation (cold-start grace).
const MIN_HISTORY: usize = 50;

/// Number of recent/early RMS samples compared for the escalation check.
const TREND_WINDOW: usize = 10;

/// Recent level must exceed the earlier level by this factor.
const ESCALATION_FACTOR: f32 = 2.0;

/// Recent level must also exceed this absolute floor.
const LEVEL_FLOOR: f32 = 0.1;

/// Correlation between the two history halves confirming self-similarity.
const CORRELATION_THRESHOLD: f32 = 0.95;

/// Cumulative feedback-protection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Confirmed feedback loops.
    pub loops_detected: u64,
    /// Channels disabled to break a loop.
    pub loops_prevented: u64,
    /// Level escalations that failed the pattern confirmation.
    pub false_positives: u64,
    /// Unix timestamp of the most recent confirmation, 0 if none.
    pub last_loop_unix: u64,
}

/// Outcome of observing one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopVerdict {
    /// Nothing suspicious.
    Clear,
    /// Level escalation without self-similarity; signal is still routed.
    Suspected {
        /// Mean RMS over the earlier trend window.
        early_avg: f32,
        /// Mean RMS over the most recent trend window.
        recent_avg: f32,
    },
    /// Escalation plus pattern confirmation: suppress output this block.
    Confirmed {
        /// Correlation coefficient between the two history halves.
        correlation: f32,
    },
}

/// Rolling-history feedback detector for one capture source.
///
/// Feed every input block through [`observe`](LoopDetector::observe); the
/// detector stays silent until 50 blocks of history exist, then flags a
/// level-escalation anomaly when the mean of the last 10 RMS values
/// exceeds twice the mean of the 10 before them (and an absolute floor),
/// and confirms it as a loop only when the two halves of the full history
/// correlate above 0.95.
///
/// # Example
///
/// ```
/// use route_audio::{LoopDetector, LoopVerdict};
///
/// let mut detector = LoopDetector::new();
/// let quiet = vec![0.01f32; 512];
/// for _ in 0..60 {
///     assert_eq!(detector.observe(&quiet), LoopVerdict::Clear);
/// }
/// ```
#[derive(Debug)]
pub struct LoopDetector {
    history: VecDeque<f32>,
    stats: LoopStats,
    enabled: bool,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopDetector {
    /// Creates a detector with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            stats: LoopStats::default(),
            enabled: true,
        }
    }

    /// Enables or disables detection. Disabled detectors still record
    /// history but always report [`LoopVerdict::Clear`].
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Counts a mitigation performed by the control layer.
    pub fn record_prevention(&mut self) {
        self.stats.loops_prevented += 1;
    }

    /// Number of RMS samples currently held.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clears the rolling history, keeping the cumulative counters.
    /// Called at session start so one session's tail never primes the next.
    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Computes the block's RMS and evaluates the history.
    pub fn observe(&mut self, block: &[f32]) -> LoopVerdict {
        self.observe_rms(dsp::rms(block))
    }

    /// Appends one RMS level and evaluates the history.
    ///
    /// Exposed separately so level sequences can be analyzed directly
    /// (e.g. replaying a recorded level trace).
    pub fn observe_rms(&mut self, rms: f32) -> LoopVerdict {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(rms);

        if !self.enabled || self.history.len() < MIN_HISTORY {
            return LoopVerdict::Clear;
        }

        let levels = self.history.make_contiguous();
        let len = levels.len();

        let recent = &levels[len - TREND_WINDOW..];
        let early = &levels[len - 2 * TREND_WINDOW..len - TREND_WINDOW];
        let recent_avg = mean(recent);
        let early_avg = mean(early);

        if recent_avg <= early_avg * ESCALATION_FACTOR || recent_avg <= LEVEL_FLOOR {
            return LoopVerdict::Clear;
        }

        tracing::warn!(
            early_avg,
            recent_avg,
            ratio = recent_avg / early_avg.max(f32::MIN_POSITIVE),
            "capture level escalation, checking for repeating pattern"
        );

        // Self-similarity check: a loop repeats its own history, so the
        // two halves of the window correlate strongly.
        let half = len / 2;
        let correlation = dsp::pearson(&levels[..half], &levels[half..2 * half]);

        match correlation {
            Some(c) if c > CORRELATION_THRESHOLD => {
                self.stats.loops_detected += 1;
                self.stats.last_loop_unix = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs());
                tracing::warn!(correlation = c, "feedback loop confirmed");
                LoopVerdict::Confirmed { correlation: c }
            }
            _ => {
                self.stats.false_positives += 1;
                LoopVerdict::Suspected {
                    early_avg,
                    recent_avg,
                }
            }
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
