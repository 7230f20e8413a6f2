//! Runtime events for monitoring router health.
//!
//! Events are non-fatal notifications about the routing session. The
//! session continues running after events are emitted - they're for
//! logging/metrics and user advisories, not error handling. The single
//! exception is [`RouterEvent::EmergencyStop`], which reports that the
//! error-rate escalation tripped and the whole router is being shut down.

use std::sync::Arc;

/// Runtime events emitted during a routing session.
///
/// # Example
///
/// ```
/// use route_audio::RouterEvent;
///
/// fn handle_event(event: RouterEvent) {
///     match event {
///         RouterEvent::FeedbackConfirmed { device, correlation } => {
///             eprintln!("feedback loop on '{device}' (correlation {correlation:.3})");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// The capture stream reported a transient problem (underrun, overrun,
    /// device hiccup). Counted, never fatal.
    StreamInterrupted {
        /// Description of why the stream was interrupted.
        reason: String,
    },

    /// The capture signal's level escalated 2x within the trend window but
    /// the self-similarity check did not confirm a loop. Informational;
    /// the block is still routed.
    FeedbackSuspected {
        /// Name of the capture device under suspicion.
        device: String,
        /// Mean RMS over the earlier trend window.
        early_avg: f32,
        /// Mean RMS over the most recent trend window.
        recent_avg: f32,
    },

    /// An acoustic feedback loop was confirmed on the capture signal.
    ///
    /// The router suppressed all output for the offending block and marked
    /// the device problematic. Call
    /// [`StreamRouter::prevent_loop`](crate::StreamRouter::prevent_loop)
    /// to disable the channel for good.
    FeedbackConfirmed {
        /// Name of the capture device the loop was detected on.
        device: String,
        /// Correlation coefficient between the two history halves.
        correlation: f32,
    },

    /// A channel was disabled to break a feedback loop.
    FeedbackMitigated {
        /// Name of the disabled output device.
        device: String,
        /// User-facing advisory (e.g. restrict the device to an
        /// output-only Bluetooth profile).
        advisory: String,
    },

    /// Processing one channel failed for one block.
    ///
    /// The block is skipped for that channel only; the remaining channels
    /// are unaffected.
    ChannelError {
        /// Name of the output device that errored.
        device: String,
        /// Description of the error.
        error: String,
    },

    /// A channel's delay queue exceeded three times its required depth and
    /// was cleared, trading completeness for glitch-free continuation.
    BufferOverflowReset {
        /// Name of the output device whose queue was cleared.
        device: String,
        /// Number of queued blocks that were discarded.
        dropped_blocks: usize,
    },

    /// One-time notice that a requested delay was quantized to whole
    /// blocks, emitted on a channel's first processed block.
    DelayQuantized {
        /// Name of the output device.
        device: String,
        /// Delay requested by the control layer, in ms.
        requested_ms: u32,
        /// Delay actually produced, in ms.
        effective_ms: f64,
        /// Number of blocks held to produce it.
        chunks: usize,
    },

    /// The per-category error threshold was exceeded; the router is
    /// stopping entirely because the real-time path itself looks unhealthy.
    EmergencyStop {
        /// Which error category tripped the threshold.
        reason: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register via [`StreamRouter::on_event`](crate::StreamRouter::on_event).
/// The callback is invoked from the real-time capture thread, so it must
/// be cheap and must never block.
pub type EventCallback = Arc<dyn Fn(RouterEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use route_audio::{event_callback, RouterEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RouterEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
