//! Mock device enumerator for testing without hardware.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::device::{DeviceDescriptor, DeviceEnumerator};
use crate::RouteAudioError;

/// A scriptable enumerator that serves a settable device inventory.
///
/// This allows testing the catalog, the change monitor's diffing and the
/// router's control surface without actual audio hardware, making the
/// whole pipeline runnable in CI.
///
/// # Example
///
/// ```
/// use route_audio::{DeviceDescriptor, DeviceEnumerator, MockEnumerator};
///
/// let mock = MockEnumerator::new();
/// mock.set_devices(vec![DeviceDescriptor {
///     index: 0,
///     name: "Speakers".into(),
///     max_input_channels: 0,
///     max_output_channels: 2,
///     host_api: "MME".into(),
///     default_sample_rate: 48_000,
/// }]);
///
/// assert_eq!(mock.enumerate().unwrap().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockEnumerator {
    devices: Arc<Mutex<Vec<DeviceDescriptor>>>,
    fail_next: Arc<AtomicU32>,
}

impl MockEnumerator {
    /// Creates a mock with an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the served inventory.
    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock() = devices;
    }

    /// Makes the next `count` calls to `enumerate` fail, simulating a
    /// transient backend outage.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Convenience constructor for a plain output device descriptor.
    #[must_use]
    pub fn output_device(index: usize, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: name.to_string(),
            max_input_channels: 0,
            max_output_channels: 2,
            host_api: "MME".to_string(),
            default_sample_rate: 48_000,
        }
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError> {
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(RouteAudioError::BackendError(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok(self.devices.lock().clone())
    }
}
