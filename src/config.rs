//! Configuration types for the routing engine.

/// Upper bound for the per-device delay, in milliseconds.
pub const DELAY_MS_MAX: u32 = 10_000;

/// Lower bound for the per-device gain, in decibels.
pub const GAIN_DB_MIN: f32 = -20.0;

/// Upper bound for the per-device gain, in decibels.
pub const GAIN_DB_MAX: f32 = 20.0;

/// Per-output-device routing parameters.
///
/// Values arriving from the control layer are clamped at this boundary,
/// never rejected: a delay of 15000 ms becomes [`DELAY_MS_MAX`], a gain of
/// -33 dB becomes [`GAIN_DB_MIN`].
///
/// The config is a small `Copy` value so the real-time callback can take a
/// complete snapshot per block. A stale snapshot for one block is fine;
/// a torn one is impossible.
///
/// # Example
///
/// ```
/// use route_audio::RoutingConfig;
///
/// let config = RoutingConfig::new(500, 6.0);
/// assert_eq!(config.delay_ms(), 500);
///
/// // Out-of-range values clamp
/// let config = RoutingConfig::new(99_999, -40.0);
/// assert_eq!(config.delay_ms(), 10_000);
/// assert_eq!(config.gain_db(), -20.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoutingConfig {
    delay_ms: u32,
    gain_db: f32,
}

impl RoutingConfig {
    /// Creates a config with the given delay and gain, clamped to range.
    #[must_use]
    pub fn new(delay_ms: u32, gain_db: f32) -> Self {
        let mut config = Self::default();
        config.set_delay_ms(delay_ms);
        config.set_gain_db(gain_db);
        config
    }

    /// Returns the configured delay in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    /// Returns the configured gain in decibels.
    #[must_use]
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Sets the delay, clamping to `[0, 10000]` ms.
    pub fn set_delay_ms(&mut self, delay_ms: u32) {
        self.delay_ms = delay_ms.min(DELAY_MS_MAX);
    }

    /// Sets the gain, clamping to `[-20, +20]` dB. Non-finite input
    /// resets to unity (0 dB).
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain_db = if gain_db.is_finite() {
            gain_db.clamp(GAIN_DB_MIN, GAIN_DB_MAX)
        } else {
            0.0
        };
    }

    /// Returns the linear amplitude factor for the configured gain.
    #[must_use]
    pub fn gain_factor(&self) -> f32 {
        10.0_f32.powf(self.gain_db / 20.0)
    }

    /// Number of whole blocks the delay queue must hold before release.
    ///
    /// Delay is produced at whole-block granularity: the queue retains
    /// `required_chunks` blocks, so the effective delay is
    /// `required_chunks * block_size / sample_rate` seconds rather than the
    /// exact requested milliseconds. Zero delay still buffers a single
    /// block to avoid discontinuity, so the result is always >= 1.
    #[must_use]
    pub fn required_chunks(&self, sample_rate: u32, block_size: u32) -> usize {
        if block_size == 0 {
            return 1;
        }
        let delay_frames = u64::from(sample_rate) * u64::from(self.delay_ms) / 1000;
        (delay_frames / u64::from(block_size)).max(1) as usize
    }

    /// The delay actually produced after block quantization, in ms.
    #[must_use]
    pub fn effective_delay_ms(&self, sample_rate: u32, block_size: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        let chunks = self.required_chunks(sample_rate, block_size);
        chunks as f64 * f64::from(block_size) / f64::from(sample_rate) * 1000.0
    }
}

/// Stream-wide audio parameters shared by the input and all outputs.
///
/// Changing `sample_rate` or `block_size` invalidates collected statistics
/// and is only permitted while the router is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sample rate in Hz for the capture and all output streams.
    pub sample_rate: u32,
    /// Frames delivered per callback invocation.
    pub block_size: u32,
    /// Interleaved channel count (2 = stereo).
    pub channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 256,
            channels: 2,
        }
    }
}

impl EngineConfig {
    /// Samples per interleaved block (`block_size * channels`).
    #[must_use]
    pub fn samples_per_block(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }
}
