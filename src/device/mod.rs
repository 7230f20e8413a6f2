//! Device inventory: descriptors, enumeration, classification and
//! hot-plug monitoring.
//!
//! This module provides the interface between CPAL's device enumeration
//! and the rest of the routing pipeline. [`DeviceEnumerator`] is the seam
//! that lets the catalog and monitor run against a [`MockEnumerator`] in
//! tests without audio hardware.

mod catalog;
mod mock;
mod monitor;

pub use catalog::{CatalogFilter, DeviceCatalog};
pub use mock::MockEnumerator;
pub use monitor::{
    device_observer, DeviceChangeMonitor, DeviceEvent, DeviceEventKind, DeviceObserver,
};

use cpal::traits::{DeviceTrait, HostTrait};

use crate::RouteAudioError;

/// Immutable snapshot of one audio device, produced fresh on every query.
///
/// Identity for monitoring purposes is the device **name**: backend
/// indices are unstable across reinitialization and are never trusted for
/// diffing, only for opening streams immediately after a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Position in the enumeration at query time. Unstable across
    /// backend reinitialization.
    pub index: usize,
    /// Device name as reported by the backend.
    pub name: String,
    /// Maximum capture channels (0 for pure sinks).
    pub max_input_channels: u16,
    /// Maximum playback channels (0 for pure sources).
    pub max_output_channels: u16,
    /// Host API family the device is exposed through.
    pub host_api: String,
    /// Default sample rate reported by the backend, in Hz.
    pub default_sample_rate: u32,
}

impl DeviceDescriptor {
    /// `true` if the device can play audio at all.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.max_output_channels > 0
    }

    /// `true` if the device is a pure sink: output channels, no capture
    /// path. Devices with a capture path are feedback risks and are not
    /// auto-classified as targets.
    #[must_use]
    pub fn is_pure_sink(&self) -> bool {
        self.max_output_channels > 0 && self.max_input_channels == 0
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}in/{}out, {}) [{}]",
            self.name,
            self.max_input_channels,
            self.max_output_channels,
            self.host_api,
            self.index
        )
    }
}

/// Source of raw device snapshots.
///
/// The production implementation is [`CpalEnumerator`]; tests use
/// [`MockEnumerator`] with scripted inventories.
pub trait DeviceEnumerator: Send + Sync {
    /// Returns the current full device list, unfiltered.
    ///
    /// # Errors
    ///
    /// Returns an error when the audio backend cannot be queried at all.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError>;
}

/// Enumerates devices across all CPAL hosts available on this platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalEnumerator;

impl CpalEnumerator {
    /// Creates a new enumerator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for CpalEnumerator {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError> {
        let mut descriptors = Vec::new();
        let mut index = 0;

        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id)
                .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;
            let devices = host
                .devices()
                .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;

            for device in devices {
                let Ok(name) = device.name() else {
                    // Nameless devices can't be addressed or diffed; skip
                    continue;
                };

                let input_config = device.default_input_config().ok();
                let output_config = device.default_output_config().ok();

                let default_sample_rate = output_config
                    .as_ref()
                    .or(input_config.as_ref())
                    .map_or(0, |c| c.sample_rate().0);

                descriptors.push(DeviceDescriptor {
                    index,
                    name,
                    max_input_channels: input_config.map_or(0, |c| c.channels()),
                    max_output_channels: output_config.map_or(0, |c| c.channels()),
                    host_api: host_id.name().to_string(),
                    default_sample_rate,
                });
                index += 1;
            }
        }

        Ok(descriptors)
    }
}
