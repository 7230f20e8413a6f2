//! Hot-plug monitoring of the device inventory.
//!
//! The audio backend offers no push notification for device changes, so
//! the monitor polls [`DeviceCatalog`] on a fixed schedule and diffs
//! snapshots by device **name**. It runs as an independent Tokio task and
//! never touches the real-time audio path - its findings are delivered as
//! events for the control layer to act on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::device::{DeviceCatalog, DeviceDescriptor};
use crate::RouteAudioError;

/// Default polling interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Bounded wait for the polling task to observe the stop flag.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive enumeration failures before a warning is logged.
const FAILURE_WARN_THRESHOLD: u32 = 3;

/// What happened to a device between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    /// The device appeared in the inventory.
    Added,
    /// The device disappeared from the inventory.
    Removed,
}

/// A hot-plug event delivered to the registered observer.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    /// Whether the device was added or removed.
    pub kind: DeviceEventKind,
    /// Snapshot of the device as of the poll that detected the change.
    pub device: DeviceDescriptor,
}

/// Callback type for receiving [`DeviceEvent`]s.
pub type DeviceObserver = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Creates a [`DeviceObserver`] from a closure.
pub fn device_observer<F>(f: F) -> DeviceObserver
where
    F: Fn(DeviceEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Computes the set difference between two snapshots keyed by name.
///
/// Removals are reported before additions. A device whose index changed
/// but whose name did not produces no event.
fn diff_snapshots(
    previous: &HashMap<String, DeviceDescriptor>,
    current: &HashMap<String, DeviceDescriptor>,
) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for (name, device) in previous {
        if !current.contains_key(name) {
            events.push(DeviceEvent {
                kind: DeviceEventKind::Removed,
                device: device.clone(),
            });
        }
    }
    for (name, device) in current {
        if !previous.contains_key(name) {
            events.push(DeviceEvent {
                kind: DeviceEventKind::Added,
                device: device.clone(),
            });
        }
    }

    events
}

fn snapshot_by_name(devices: Vec<DeviceDescriptor>) -> HashMap<String, DeviceDescriptor> {
    devices.into_iter().map(|d| (d.name.clone(), d)).collect()
}

/// Watches the device inventory and reports add/remove events.
///
/// Lifecycle is `Stopped -> Running -> Stopped`. [`start`] takes an
/// initial snapshot and launches the polling loop; [`stop`] signals
/// termination and joins the loop with a bounded timeout. The monitor is
/// designed to run unattended for the whole session: transient
/// enumeration failures are swallowed and retried on the next tick.
///
/// [`start`]: DeviceChangeMonitor::start
/// [`stop`]: DeviceChangeMonitor::stop
///
/// # Example
///
/// ```rust,ignore
/// use route_audio::{device_observer, DeviceCatalog, DeviceChangeMonitor};
///
/// let catalog = DeviceCatalog::with_default_host();
/// let mut monitor = DeviceChangeMonitor::new(
///     catalog,
///     device_observer(|event| tracing::info!(?event, "device change")),
/// );
/// monitor.start()?;
/// // ... session runs ...
/// monitor.stop().await;
/// ```
pub struct DeviceChangeMonitor {
    catalog: Arc<DeviceCatalog>,
    observer: DeviceObserver,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    polls: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl DeviceChangeMonitor {
    /// Creates a stopped monitor over the given catalog.
    pub fn new(catalog: DeviceCatalog, observer: DeviceObserver) -> Self {
        Self {
            catalog: Arc::new(catalog),
            observer,
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            polls: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Overrides the polling interval (default 800 ms).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `true` while the polling task is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of polls completed since the last start.
    #[must_use]
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Takes the initial snapshot and launches the polling loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RouteAudioError::AlreadyRunning`] if the monitor is
    /// already started, or the enumeration error if the initial snapshot
    /// cannot be taken.
    pub fn start(&mut self) -> Result<(), RouteAudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RouteAudioError::AlreadyRunning);
        }

        let initial = match self.catalog.list_devices() {
            Ok(devices) => snapshot_by_name(devices),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        tracing::info!(devices = initial.len(), "device monitor started");

        self.polls.store(0, Ordering::SeqCst);
        let catalog = Arc::clone(&self.catalog);
        let observer = Arc::clone(&self.observer);
        let running = Arc::clone(&self.running);
        let polls = Arc::clone(&self.polls);
        let poll_interval = self.poll_interval;

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; consume it so
            // polling starts one full interval after the initial snapshot.
            interval.tick().await;

            let mut previous = initial;
            let mut consecutive_failures = 0u32;

            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let cycle = polls.fetch_add(1, Ordering::SeqCst) + 1;

                match catalog.list_devices() {
                    Ok(devices) => {
                        consecutive_failures = 0;
                        let current = snapshot_by_name(devices);
                        for event in diff_snapshots(&previous, &current) {
                            tracing::info!(
                                kind = ?event.kind,
                                device = %event.device.name,
                                "device change detected"
                            );
                            observer(event);
                        }
                        previous = current;
                    }
                    Err(e) => {
                        // Transient: keep the old snapshot, retry next tick
                        consecutive_failures += 1;
                        tracing::debug!(error = %e, "device enumeration failed");
                        if consecutive_failures == FAILURE_WARN_THRESHOLD {
                            tracing::warn!(
                                failures = consecutive_failures,
                                error = %e,
                                "device enumeration keeps failing; will keep retrying"
                            );
                        }
                    }
                }

                if cycle % 10 == 0 {
                    tracing::debug!(cycle, devices = previous.len(), "monitor heartbeat");
                }
            }

            tracing::info!("device monitor stopped");
        }));

        Ok(())
    }

    /// Signals termination and joins the polling loop.
    ///
    /// Waits up to five seconds for the task to observe the stop flag;
    /// past that the task is aborted rather than hanging the caller.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.task.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("device monitor did not stop within timeout, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for DeviceChangeMonitor {
    fn drop(&mut self) {
        // Best effort: the task observes the flag within one interval
        self.running.store(false, Ordering::SeqCst);
    }
}
