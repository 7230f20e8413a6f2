//! Classified view over the raw device inventory.

use std::sync::Arc;

use crate::device::{CpalEnumerator, DeviceDescriptor, DeviceEnumerator};
use crate::RouteAudioError;

/// Filtering and classification rules for the catalog.
///
/// The defaults restrict listing to one host-API family (avoiding the
/// duplicate virtual entries many backends expose per API), drop the
/// system virtual-mapper pseudo-devices, and treat a virtual-cable
/// loopback as the preferred capture source.
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    /// Keep only devices from this host API. `None` keeps everything,
    /// which is mainly useful with mock enumerators.
    pub host_api: Option<String>,
    /// Substrings identifying system virtual-mapper devices to exclude.
    pub excluded_names: Vec<String>,
    /// Substrings identifying preferred capture-source devices.
    pub preferred_sources: Vec<String>,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            host_api: None,
            excluded_names: vec![
                "Microsoft Sound Mapper".to_string(),
                "Sound Mapper".to_string(),
                "Primary Sound Driver".to_string(),
                "Mapper".to_string(),
            ],
            preferred_sources: vec!["Line 1 (Virtual Audio Cable)".to_string()],
        }
    }
}

impl CatalogFilter {
    /// `true` if the name matches one of the exclusion substrings.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_names.iter().any(|ex| name.contains(ex))
    }

    /// `true` if the name matches the preferred source list.
    #[must_use]
    pub fn is_preferred_source(&self, name: &str) -> bool {
        self.preferred_sources.iter().any(|s| name.contains(s))
    }
}

/// Queries the audio backend for devices and classifies them into usable
/// source and target roles.
///
/// The catalog is a pure query layer: every call produces a fresh
/// snapshot and nothing is cached here. Callers that need caching apply
/// their own TTL.
///
/// # Example
///
/// ```
/// use route_audio::{CatalogFilter, DeviceCatalog, MockEnumerator};
///
/// let enumerator = MockEnumerator::new();
/// let catalog = DeviceCatalog::new(enumerator, CatalogFilter::default());
/// assert!(catalog.targets().unwrap().is_empty());
/// ```
pub struct DeviceCatalog {
    enumerator: Arc<dyn DeviceEnumerator>,
    filter: CatalogFilter,
}

impl DeviceCatalog {
    /// Creates a catalog over the given enumerator and filter.
    pub fn new(enumerator: impl DeviceEnumerator + 'static, filter: CatalogFilter) -> Self {
        Self {
            enumerator: Arc::new(enumerator),
            filter,
        }
    }

    /// Creates a catalog over CPAL, filtered to the platform's default
    /// host API family.
    #[must_use]
    pub fn with_default_host() -> Self {
        let filter = CatalogFilter {
            host_api: Some(cpal::default_host().id().name().to_string()),
            ..CatalogFilter::default()
        };
        Self::new(CpalEnumerator::new(), filter)
    }

    /// Returns the active filter.
    #[must_use]
    pub fn filter(&self) -> &CatalogFilter {
        &self.filter
    }

    /// Lists devices after host-API filtering and mapper exclusion, in
    /// enumeration order.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError> {
        let raw = self.enumerator.enumerate()?;
        Ok(raw
            .into_iter()
            .filter(|d| {
                self.filter
                    .host_api
                    .as_ref()
                    .map_or(true, |api| &d.host_api == api)
            })
            .filter(|d| !self.filter.is_excluded(&d.name))
            .collect())
    }

    /// Devices usable as routing targets: pure sinks (output channels,
    /// no capture path) that are not preferred sources.
    pub fn targets(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(|d| d.is_pure_sink() && !self.filter.is_preferred_source(&d.name))
            .collect())
    }

    /// Candidate capture sources, by preferred-name match.
    pub fn sources(&self) -> Result<Vec<DeviceDescriptor>, RouteAudioError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(|d| self.filter.is_preferred_source(&d.name))
            .collect())
    }

    /// Resolves a device name to its current backend index.
    ///
    /// The result is only valid until the backend reinitializes; resolve
    /// immediately before opening a stream, never store the index.
    pub fn resolve_index(&self, name: &str) -> Result<usize, RouteAudioError> {
        self.list_devices()?
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.index)
            .ok_or_else(|| RouteAudioError::DeviceNotFound {
                name: name.to_string(),
            })
    }
}
