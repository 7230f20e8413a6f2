//! # route-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio routing from a single capture device to any number of
//! independently configured output devices.
//!
//! `route-audio` forwards each input block to every active output channel,
//! applying a per-device delay and gain on the way, while a feedback
//! detector watches the capture signal for runaway amplification caused by
//! bidirectional devices (e.g. Bluetooth speakers that expose a
//! microphone). A companion monitor polls the OS device inventory and
//! reports hot-plug events without a restart.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use route_audio::{DeviceCatalog, RoutingConfig, StreamRouter};
//!
//! let catalog = DeviceCatalog::with_default_host();
//! let source = catalog.sources()?.into_iter().next().expect("no source");
//! let target = catalog.targets()?.into_iter().next().expect("no target");
//!
//! let mut router = StreamRouter::new(Default::default())
//!     .on_event(|e| tracing::warn!(?e, "router event"));
//! router.add_target(&target, RoutingConfig::new(250, -3.0))?;
//! router.start(&source)?;
//! router.run_until_stopped();
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **CPAL input thread**: the capture callback runs the whole signal
//!   chain (feedback check, delay queue, gain) without ever blocking on a
//!   control-plane lock held for unbounded time
//! - **Ring buffers**: each output device drains a lock-free SPSC queue,
//!   so a slow device never stalls the capture callback
//! - **Control plane**: channels are added/removed through copy-on-write
//!   snapshots consumed by the callback; the device monitor runs as an
//!   independent Tokio task
//!
//! This design keeps every output glitch-free even while configuration
//! changes concurrently, and keeps a single misbehaving device from
//! corrupting the rest.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod config;
pub mod device;
mod dsp;
mod error;
mod event;
pub mod routing;
mod stats;

pub use config::{EngineConfig, RoutingConfig, DELAY_MS_MAX, GAIN_DB_MAX, GAIN_DB_MIN};
pub use device::{
    device_observer, CatalogFilter, CpalEnumerator, DeviceCatalog, DeviceChangeMonitor,
    DeviceDescriptor, DeviceEnumerator, DeviceEvent, DeviceEventKind, DeviceObserver,
    MockEnumerator,
};
pub use error::{RouteAudioError, WriteError};
pub use event::{event_callback, EventCallback, RouterEvent};
pub use routing::{
    BlockWriter, Channel, LoopDetector, LoopStats, LoopVerdict, RouterHandle, RouterState,
    StreamRouter,
};
pub use stats::{Stability, StreamStats};
