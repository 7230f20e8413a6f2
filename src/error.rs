//! Error types for route-audio.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`RouteAudioError`]): Reject a control operation
//! - **Recoverable events**: Runtime issues surfaced via [`EventCallback`](crate::EventCallback)

/// Fatal errors returned from control-plane operations.
///
/// These reject the operation that caused them (starting the router,
/// adding a target, starting the monitor). Runtime issues inside the
/// real-time path (a channel write failing, feedback suspicion, buffer
/// resets) are never surfaced this way - they are recovered locally and
/// reported through the event callback instead, because an error escaping
/// the audio callback would stall every output at once.
#[derive(Debug, thiserror::Error)]
pub enum RouteAudioError {
    /// No device with the requested name exists.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// The device exists but its stream could not be opened.
    #[error("device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the unavailable device.
        name: String,
        /// Reason the device is unavailable.
        reason: String,
    },

    /// A target with the same device name is already routed.
    #[error("target already routed: {name}")]
    DuplicateTarget {
        /// Name of the duplicated target device.
        name: String,
    },

    /// The router was started without any target channels.
    #[error("no targets configured - add at least one target device")]
    NoTargetsConfigured,

    /// Start was requested while the router (or monitor) is already running.
    #[error("already running")]
    AlreadyRunning,

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state for {operation}: {state}")]
    InvalidState {
        /// Operation that was rejected.
        operation: String,
        /// Lifecycle state the router was in.
        state: String,
    },

    /// The requested sample format is not supported by the device.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),
}

/// Errors that can occur within a [`BlockWriter`](crate::BlockWriter)
/// implementation.
///
/// Write errors are recoverable - the router counts them, emits a
/// [`RouterEvent::ChannelError`](crate::RouterEvent::ChannelError) and
/// continues with the remaining channels.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The output queue had no room for the full block.
    #[error("output buffer full: dropped {dropped} samples")]
    BufferFull {
        /// Number of samples that did not fit.
        dropped: usize,
    },

    /// Custom error for user-implemented writers.
    #[error("{0}")]
    Custom(String),
}

impl WriteError {
    /// Creates a custom write error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_audio_error_display() {
        let err = RouteAudioError::DeviceNotFound {
            name: "USB Speakers".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Speakers");
    }

    #[test]
    fn test_write_error_custom() {
        let err = WriteError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_write_error_buffer_full() {
        let err = WriteError::BufferFull { dropped: 512 };
        assert_eq!(err.to_string(), "output buffer full: dropped 512 samples");
    }
}
