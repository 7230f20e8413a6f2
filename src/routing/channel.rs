//! Per-output-device channel: delay queue, gain staging and the writer
//! seam towards the actual output stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::device::DeviceDescriptor;
use crate::event::{EventCallback, RouterEvent};
use crate::{dsp, EngineConfig, RoutingConfig, WriteError};

/// Queue depth multiple past which the channel resets itself.
const OVERFLOW_MULTIPLE: usize = 3;

/// A destination for processed audio blocks.
///
/// The built-in implementation feeds a CPAL output stream through a
/// lock-free ring buffer; implement this trait to route blocks anywhere
/// else (network, file, analysis). `write_block` is called from the
/// real-time capture thread and must never block.
///
/// # Example
///
/// ```
/// use route_audio::{BlockWriter, WriteError};
///
/// struct PrintWriter;
///
/// impl BlockWriter for PrintWriter {
///     fn write_block(&mut self, block: &[f32]) -> Result<(), WriteError> {
///         println!("received {} samples", block.len());
///         Ok(())
///     }
/// }
/// ```
pub trait BlockWriter: Send {
    /// Writes one interleaved block to the destination.
    fn write_block(&mut self, block: &[f32]) -> Result<(), WriteError>;
}

/// State for one routed output device.
///
/// The channel owns the delay queue and the routing parameters; the
/// invariants live here rather than in parallel maps:
///
/// - the queue never exceeds `3 x required_chunks` blocks (overflow
///   forces a clear, favoring glitch-free continuation over completeness)
/// - `required_chunks >= 1` always, so zero delay still passes through
///   single-block buffering
///
/// Configuration is a small `Copy` value behind a lock held only for the
/// copy itself, so the real-time path reads a consistent snapshot per
/// block and control-plane updates take effect on the next block without
/// a restart.
pub struct Channel {
    descriptor: DeviceDescriptor,
    config: RwLock<RoutingConfig>,
    queue: Mutex<VecDeque<Vec<f32>>>,
    writer: Mutex<Box<dyn BlockWriter>>,
    enabled: AtomicBool,
    problematic: AtomicBool,
    quantization_reported: AtomicBool,
}

impl Channel {
    /// Creates an enabled channel over the given writer.
    pub fn new(
        descriptor: DeviceDescriptor,
        writer: Box<dyn BlockWriter>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            descriptor,
            config: RwLock::new(config),
            queue: Mutex::new(VecDeque::new()),
            writer: Mutex::new(writer),
            enabled: AtomicBool::new(true),
            problematic: AtomicBool::new(false),
            quantization_reported: AtomicBool::new(false),
        }
    }

    /// The output device's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The output device's descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Snapshot of the current routing parameters.
    #[must_use]
    pub fn config(&self) -> RoutingConfig {
        *self.config.read()
    }

    /// Sets the delay, clamped to range. Takes effect on the next block.
    pub fn set_delay_ms(&self, delay_ms: u32) {
        self.config.write().set_delay_ms(delay_ms);
    }

    /// Sets the gain, clamped to range. Takes effect on the next block.
    pub fn set_gain_db(&self, gain_db: f32) {
        self.config.write().set_gain_db(gain_db);
    }

    /// `true` while the channel participates in routing.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables the channel without destroying it.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// `true` once the channel has been implicated in a feedback loop.
    #[must_use]
    pub fn is_problematic(&self) -> bool {
        self.problematic.load(Ordering::Relaxed)
    }

    /// Flags the channel as feedback-implicated.
    pub fn mark_problematic(&self) {
        self.problematic.store(true, Ordering::Relaxed);
    }

    /// Number of blocks currently held in the delay queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drops all queued blocks.
    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }

    /// Runs the channel's part of the signal chain for one input block.
    ///
    /// Applies gain (with soft limiting on boost), queues the block, and
    /// releases everything past the delay depth to the writer. Called
    /// from the real-time capture thread.
    pub(crate) fn process_block(
        &self,
        input: &[f32],
        engine: &EngineConfig,
        events: Option<&EventCallback>,
    ) -> Result<(), WriteError> {
        let config = self.config();
        let required_chunks = config.required_chunks(engine.sample_rate, engine.block_size);

        if !self.quantization_reported.swap(true, Ordering::Relaxed) {
            let effective_ms = config.effective_delay_ms(engine.sample_rate, engine.block_size);
            tracing::debug!(
                device = %self.descriptor.name,
                requested_ms = config.delay_ms(),
                effective_ms,
                chunks = required_chunks,
                "delay quantized to whole blocks"
            );
            if let Some(callback) = events {
                callback(RouterEvent::DelayQuantized {
                    device: self.descriptor.name.clone(),
                    requested_ms: config.delay_ms(),
                    effective_ms,
                    chunks: required_chunks,
                });
            }
        }

        let mut processed = input.to_vec();
        dsp::apply_gain(&mut processed, config.gain_factor());

        let mut queue = self.queue.lock();
        queue.push_back(processed);

        if queue.len() > required_chunks * OVERFLOW_MULTIPLE {
            let dropped_blocks = queue.len();
            queue.clear();
            tracing::warn!(
                device = %self.descriptor.name,
                dropped_blocks,
                "delay queue overflow, cleared"
            );
            if let Some(callback) = events {
                callback(RouterEvent::BufferOverflowReset {
                    device: self.descriptor.name.clone(),
                    dropped_blocks,
                });
            }
            return Ok(());
        }

        let mut writer = self.writer.lock();
        while queue.len() > required_chunks {
            let Some(block) = queue.pop_front() else { break };
            writer.write_block(&block)?;
        }

        Ok(())
    }
}
