//! The stream router: one capture stream fanned out to every channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::device::DeviceDescriptor;
use crate::event::{EventCallback, RouterEvent};
use crate::routing::backend::{self, InputStream, OutputStream};
use crate::routing::channel::{BlockWriter, Channel};
use crate::routing::guard::{LoopDetector, LoopStats, LoopVerdict};
use crate::stats::StreamStats;
use crate::{dsp, EngineConfig, RouteAudioError, RoutingConfig};

/// Bytes per sample in the f32 processing chain.
const BYTES_PER_SAMPLE: u32 = std::mem::size_of::<f32>() as u32;

/// Poll period of the cooperative wait loop.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-category error ceiling before the router stops itself.
const MAX_ERRORS_PER_CATEGORY: u32 = 5;

/// Quiet period after which category error counters reset.
const ERROR_RESET_WINDOW: Duration = Duration::from_secs(300);

/// Maximum recovery attempts inside one recovery window.
const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Window within which repeated recovery attempts are counted together.
const RECOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Advisory attached to feedback mitigation events.
const FEEDBACK_ADVISORY: &str = "Feedback loop detected; the device was disabled. \
     Check its Bluetooth profile settings, disable its microphone, \
     or restrict it to the output-only A2DP profile.";

/// Router lifecycle states.
///
/// The lifecycle is a single authoritative field, not inferred from
/// thread liveness: `Idle -> Starting -> Running -> Stopping -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    /// No session active.
    Idle = 0,
    /// A start request is being carried out.
    Starting = 1,
    /// The capture callback is live.
    Running = 2,
    /// A stop was requested; teardown pending.
    Stopping = 3,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        write!(f, "{name}")
    }
}

/// Recoverable-error categories tracked for escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    /// Capture-stream level failures.
    Stream = 0,
    /// Per-channel processing failures inside the callback.
    Channel = 1,
    /// Confirmed feedback events.
    Feedback = 2,
}

impl ErrorCategory {
    fn name(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Channel => "channel",
            Self::Feedback => "feedback",
        }
    }
}

/// Per-category error counters with a quiet-period reset.
///
/// Repeated errors in one category indicate the real-time path itself is
/// unhealthy, so crossing the ceiling escalates to a full router stop
/// rather than muddling on with corrupted output.
struct ErrorMonitor {
    counts: [u32; 3],
    last_error: Option<Instant>,
}

impl ErrorMonitor {
    fn new() -> Self {
        Self {
            counts: [0; 3],
            last_error: None,
        }
    }

    fn reset(&mut self) {
        self.counts = [0; 3];
        self.last_error = None;
    }

    /// Records one error; returns `true` when the category ceiling is
    /// exceeded.
    fn record(&mut self, category: ErrorCategory, now: Instant) -> bool {
        if let Some(last) = self.last_error {
            if now.duration_since(last) > ERROR_RESET_WINDOW {
                self.counts = [0; 3];
            }
        }
        self.last_error = Some(now);
        let count = &mut self.counts[category as usize];
        *count += 1;
        *count > MAX_ERRORS_PER_CATEGORY
    }
}

/// State shared between the control plane and the real-time callback.
struct RouterCore {
    engine: RwLock<EngineConfig>,
    /// Copy-on-write snapshot the callback iterates; swapped whole under
    /// a momentary write lock, never mutated in place.
    channels: RwLock<Arc<Vec<Arc<Channel>>>>,
    state: AtomicU8,
    emergency: AtomicBool,
    guard: Mutex<LoopDetector>,
    stats: Mutex<StreamStats>,
    errors: Mutex<ErrorMonitor>,
    events: RwLock<Option<EventCallback>>,
    source_name: Mutex<Option<String>>,
    problematic_sources: Mutex<HashSet<String>>,
}

impl RouterCore {
    fn new(engine: EngineConfig) -> Self {
        Self {
            engine: RwLock::new(engine),
            channels: RwLock::new(Arc::new(Vec::new())),
            state: AtomicU8::new(RouterState::Idle as u8),
            emergency: AtomicBool::new(false),
            guard: Mutex::new(LoopDetector::new()),
            stats: Mutex::new(StreamStats::new()),
            errors: Mutex::new(ErrorMonitor::new()),
            events: RwLock::new(None),
            source_name: Mutex::new(None),
            problematic_sources: Mutex::new(HashSet::new()),
        }
    }

    fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RouterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: RouterState, to: RouterState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn emit(&self, event: RouterEvent) {
        if let Some(callback) = self.events.read().as_ref() {
            callback(event);
        }
    }

    /// Records a categorized error; trips the emergency flag on overflow.
    fn record_category(&self, category: ErrorCategory, now: Instant) {
        let critical = self.errors.lock().record(category, now);
        if critical && !self.emergency.swap(true, Ordering::SeqCst) {
            tracing::error!(
                category = category.name(),
                "error threshold exceeded, emergency stop"
            );
            self.emit(RouterEvent::EmergencyStop {
                reason: format!("too many {} errors", category.name()),
            });
        }
    }

    fn on_stream_error(&self, reason: String) {
        let now = Instant::now();
        self.stats.lock().record_error();
        self.emit(RouterEvent::StreamInterrupted { reason });
        self.record_category(ErrorCategory::Stream, now);
    }

    /// The real-time fan-out: one capture block in, every channel served.
    ///
    /// Invoked by the backend's capture callback (or by an external
    /// driver via [`RouterHandle::process_block`]). Failures here are
    /// always recovered locally - an error escaping this function would
    /// stall every output at once.
    fn process_block(&self, input: &[f32]) {
        if self.state() != RouterState::Running || self.emergency.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let engine = *self.engine.read();
        let frames = (input.len() / engine.channels.max(1) as usize) as u32;
        self.stats
            .lock()
            .record_callback(frames, engine.channels, BYTES_PER_SAMPLE, now);

        match self.guard.lock().observe(input) {
            LoopVerdict::Confirmed { correlation } => {
                let device = self.source_name.lock().clone().unwrap_or_default();
                self.problematic_sources.lock().insert(device.clone());
                tracing::warn!(%device, correlation, "feedback confirmed, block suppressed");
                self.emit(RouterEvent::FeedbackConfirmed {
                    device,
                    correlation,
                });
                self.record_category(ErrorCategory::Feedback, now);
                // Fail safe: nothing is written anywhere this block
                return;
            }
            LoopVerdict::Suspected {
                early_avg,
                recent_avg,
            } => {
                let device = self.source_name.lock().clone().unwrap_or_default();
                self.emit(RouterEvent::FeedbackSuspected {
                    device,
                    early_avg,
                    recent_avg,
                });
            }
            LoopVerdict::Clear => {}
        }

        // Cheap anti-aliasing for very high rates, shared by all channels
        let smoothed;
        let block: &[f32] = if engine.sample_rate > 48_000 {
            let mut copy = input.to_vec();
            dsp::smooth_frames(&mut copy, engine.channels as usize);
            smoothed = copy;
            &smoothed
        } else {
            input
        };

        let channels = Arc::clone(&self.channels.read());
        let events = self.events.read();
        for channel in channels.iter() {
            if !channel.is_enabled() {
                continue;
            }
            if let Err(error) = channel.process_block(block, &engine, events.as_ref()) {
                self.stats.lock().record_error();
                tracing::warn!(device = %channel.name(), %error, "channel processing failed");
                self.emit(RouterEvent::ChannelError {
                    device: channel.name().to_string(),
                    error: error.to_string(),
                });
                self.record_category(ErrorCategory::Channel, now);
            }
        }
    }
}

/// Cloneable, thread-safe view into a router.
///
/// Hand this to other threads to observe state, request a stop, or - when
/// the session was started with
/// [`start_external`](StreamRouter::start_external) - feed capture blocks
/// from a custom backend.
#[derive(Clone)]
pub struct RouterHandle {
    core: Arc<RouterCore>,
}

impl RouterHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RouterState {
        self.core.state()
    }

    /// Snapshot of the session statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.core.stats.lock().clone()
    }

    /// Cumulative feedback-protection counters.
    #[must_use]
    pub fn loop_stats(&self) -> LoopStats {
        self.core.guard.lock().stats()
    }

    /// `true` once the error escalation tripped.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.core.emergency.load(Ordering::SeqCst)
    }

    /// Requests a cooperative stop; the driving context observes it
    /// within one wait-poll interval.
    pub fn request_stop(&self) {
        if self.core.transition(RouterState::Running, RouterState::Stopping) {
            tracing::info!("stop requested");
        }
    }

    /// Feeds one interleaved capture block through the routing chain.
    ///
    /// Only meaningful for sessions started with
    /// [`start_external`](StreamRouter::start_external); blocks are
    /// ignored unless the router is running.
    pub fn process_block(&self, input: &[f32]) {
        self.core.process_block(input);
    }
}

/// Owns the capture stream and the set of routed output channels.
///
/// All control-plane operations happen here: adding/removing targets,
/// adjusting per-device delay and gain, starting and stopping the
/// session. The real-time callback never sees a collection under
/// mutation - it iterates a copy-on-write snapshot that control edits
/// swap atomically, and an edit takes effect no later than the next
/// block.
///
/// The router keeps the CPAL stream handles, which are not `Send`;
/// create and drive it from one control thread and share a
/// [`RouterHandle`] with everything else.
pub struct StreamRouter {
    core: Arc<RouterCore>,
    channel_index: HashMap<String, Arc<Channel>>,
    outputs: HashMap<String, OutputStream>,
    input: Option<InputStream>,
    recovery_attempts: u32,
    recovery_last: Option<Instant>,
}

impl StreamRouter {
    /// Creates an idle router with the given stream parameters.
    #[must_use]
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            core: Arc::new(RouterCore::new(engine)),
            channel_index: HashMap::new(),
            outputs: HashMap::new(),
            input: None,
            recovery_attempts: 0,
            recovery_last: None,
        }
    }

    /// Registers a callback for runtime events.
    #[must_use]
    pub fn on_event<F>(self, callback: F) -> Self
    where
        F: Fn(RouterEvent) + Send + Sync + 'static,
    {
        *self.core.events.write() = Some(Arc::new(callback));
        self
    }

    /// Returns a cloneable, thread-safe handle to this router.
    #[must_use]
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RouterState {
        self.core.state()
    }

    /// Current stream parameters.
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        *self.core.engine.read()
    }

    /// Snapshot of the session statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.core.stats.lock().clone()
    }

    /// Cumulative feedback-protection counters.
    #[must_use]
    pub fn loop_stats(&self) -> LoopStats {
        self.core.guard.lock().stats()
    }

    /// Capture devices that have been implicated in a feedback loop.
    #[must_use]
    pub fn problematic_devices(&self) -> Vec<String> {
        self.core
            .problematic_sources
            .lock()
            .iter()
            .cloned()
            .collect()
    }

    /// Names of the currently routed target devices, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channel_index.keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks up a routed channel by device name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channel_index.get(name).cloned()
    }

    /// Changes sample rate and block size. Only allowed while idle;
    /// invalidates (resets) the collected statistics.
    pub fn set_stream_params(
        &mut self,
        sample_rate: u32,
        block_size: u32,
    ) -> Result<(), RouteAudioError> {
        let state = self.state();
        if state != RouterState::Idle {
            return Err(RouteAudioError::InvalidState {
                operation: "set_stream_params".to_string(),
                state: state.to_string(),
            });
        }
        {
            let mut engine = self.core.engine.write();
            engine.sample_rate = sample_rate;
            engine.block_size = block_size;
        }
        self.core.stats.lock().reset();
        tracing::info!(sample_rate, block_size, "stream parameters changed");
        Ok(())
    }

    /// Routes a new target device, opening its output stream.
    ///
    /// On open failure (device busy or unavailable) the error is returned
    /// and no channel is created.
    pub fn add_target(
        &mut self,
        descriptor: &DeviceDescriptor,
        config: RoutingConfig,
    ) -> Result<(), RouteAudioError> {
        if self.channel_index.contains_key(&descriptor.name) {
            return Err(RouteAudioError::DuplicateTarget {
                name: descriptor.name.clone(),
            });
        }

        let engine = self.engine();
        let device = backend::find_device(&descriptor.name)?;
        let (stream, writer) =
            backend::open_output(&device, &engine).map_err(|e| {
                RouteAudioError::DeviceUnavailable {
                    name: descriptor.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.outputs.insert(descriptor.name.clone(), stream);
        self.insert_channel(descriptor.clone(), Box::new(writer), config);
        Ok(())
    }

    /// Routes a target through a caller-supplied [`BlockWriter`] instead
    /// of a device stream - the seam for custom destinations and
    /// hardware-free tests.
    pub fn add_channel(
        &mut self,
        descriptor: DeviceDescriptor,
        writer: Box<dyn BlockWriter>,
        config: RoutingConfig,
    ) -> Result<(), RouteAudioError> {
        if self.channel_index.contains_key(&descriptor.name) {
            return Err(RouteAudioError::DuplicateTarget {
                name: descriptor.name,
            });
        }
        self.insert_channel(descriptor, writer, config);
        Ok(())
    }

    fn insert_channel(
        &mut self,
        descriptor: DeviceDescriptor,
        writer: Box<dyn BlockWriter>,
        config: RoutingConfig,
    ) {
        let name = descriptor.name.clone();
        let channel = Arc::new(Channel::new(descriptor, writer, config));
        self.channel_index.insert(name.clone(), channel);
        self.publish_channels();
        tracing::info!(device = %name, "target routed");
    }

    /// Removes a target and closes its output stream.
    pub fn remove_target(&mut self, name: &str) -> Result<(), RouteAudioError> {
        let channel =
            self.channel_index
                .remove(name)
                .ok_or_else(|| RouteAudioError::DeviceNotFound {
                    name: name.to_string(),
                })?;
        channel.set_enabled(false);
        channel.clear_queue();
        self.outputs.remove(name);
        self.publish_channels();
        tracing::info!(device = %name, "target removed");
        Ok(())
    }

    /// Sets a target's delay, clamped to `[0, 10000]` ms. Applies on the
    /// next block without a restart.
    pub fn set_delay_ms(&mut self, name: &str, delay_ms: u32) -> Result<(), RouteAudioError> {
        let channel = self
            .channel_index
            .get(name)
            .ok_or_else(|| RouteAudioError::DeviceNotFound {
                name: name.to_string(),
            })?;
        channel.set_delay_ms(delay_ms);
        Ok(())
    }

    /// Sets a target's gain, clamped to `[-20, +20]` dB. Applies on the
    /// next block without a restart.
    pub fn set_gain_db(&mut self, name: &str, gain_db: f32) -> Result<(), RouteAudioError> {
        let channel = self
            .channel_index
            .get(name)
            .ok_or_else(|| RouteAudioError::DeviceNotFound {
                name: name.to_string(),
            })?;
        channel.set_gain_db(gain_db);
        Ok(())
    }

    /// Starts a routing session capturing from the given source device.
    ///
    /// Not reentrant: a second start while a session is active is
    /// rejected with [`RouteAudioError::AlreadyRunning`].
    pub fn start(&mut self, source: &DeviceDescriptor) -> Result<(), RouteAudioError> {
        self.begin_session(&source.name)?;

        let engine = self.engine();
        let device = match backend::find_device(&source.name) {
            Ok(device) => device,
            Err(e) => {
                self.core.set_state(RouterState::Idle);
                return Err(e);
            }
        };

        let callback_core = Arc::clone(&self.core);
        let error_core = Arc::clone(&self.core);
        let input = backend::open_input(
            &device,
            &engine,
            move |block| callback_core.process_block(block),
            move |reason| error_core.on_stream_error(reason),
        );

        match input {
            Ok(stream) => {
                self.input = Some(stream);
                self.core.set_state(RouterState::Running);
                tracing::info!(source = %source.name, "routing session running");
                Ok(())
            }
            Err(e) => {
                self.core.set_state(RouterState::Idle);
                Err(RouteAudioError::DeviceUnavailable {
                    name: source.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Starts a session that is fed externally through
    /// [`RouterHandle::process_block`] instead of a CPAL capture stream.
    ///
    /// Use this to drive the router from your own audio backend.
    pub fn start_external(&mut self, source_name: &str) -> Result<(), RouteAudioError> {
        self.begin_session(source_name)?;
        self.core.set_state(RouterState::Running);
        tracing::info!(source = source_name, "externally-driven session running");
        Ok(())
    }

    fn begin_session(&mut self, source_name: &str) -> Result<(), RouteAudioError> {
        if !self.core.transition(RouterState::Idle, RouterState::Starting) {
            return Err(RouteAudioError::AlreadyRunning);
        }
        if self.channel_index.is_empty() {
            self.core.set_state(RouterState::Idle);
            return Err(RouteAudioError::NoTargetsConfigured);
        }

        self.core.emergency.store(false, Ordering::SeqCst);
        *self.core.source_name.lock() = Some(source_name.to_string());
        self.core.guard.lock().reset_history();
        self.core.errors.lock().reset();
        self.core.stats.lock().start(Instant::now());
        tracing::info!(
            source = source_name,
            targets = self.channel_index.len(),
            "routing session starting"
        );
        Ok(())
    }

    /// Stops the session. Idempotent; teardown of the capture stream is
    /// RAII so no backend handle can leak regardless of how the session
    /// ends.
    pub fn stop(&mut self) {
        if self.core.state() == RouterState::Idle {
            return;
        }
        self.core.set_state(RouterState::Stopping);
        self.input = None;
        self.core.stats.lock().reset();
        self.core.emergency.store(false, Ordering::SeqCst);
        self.core.set_state(RouterState::Idle);
        tracing::info!("routing session stopped");
    }

    /// Blocks until the session ends.
    ///
    /// Observes cooperative stop requests (via
    /// [`RouterHandle::request_stop`]) and the emergency-stop flag once
    /// per poll interval, then performs the teardown.
    pub fn run_until_stopped(&mut self) {
        loop {
            let state = self.state();
            if state == RouterState::Idle {
                break;
            }
            if self.core.emergency.load(Ordering::SeqCst) {
                tracing::error!("emergency stop, tearing down session");
                self.stop();
                break;
            }
            if state == RouterState::Stopping {
                self.stop();
                break;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Disables a channel to break a confirmed feedback loop.
    ///
    /// Stops and closes the channel's output stream, clears its queue,
    /// removes it from the active set and emits a
    /// [`RouterEvent::FeedbackMitigated`] advisory.
    pub fn prevent_loop(&mut self, name: &str) -> Result<(), RouteAudioError> {
        let channel =
            self.channel_index
                .remove(name)
                .ok_or_else(|| RouteAudioError::DeviceNotFound {
                    name: name.to_string(),
                })?;

        channel.set_enabled(false);
        channel.mark_problematic();
        channel.clear_queue();
        self.outputs.remove(name);
        self.publish_channels();
        self.core.guard.lock().record_prevention();

        tracing::warn!(device = %name, "channel disabled to break feedback loop");
        self.core.emit(RouterEvent::FeedbackMitigated {
            device: name.to_string(),
            advisory: FEEDBACK_ADVISORY.to_string(),
        });
        Ok(())
    }

    /// Clears every channel's queue and the error counters, bounded to
    /// three attempts inside a five-second window.
    ///
    /// Returns `false` when the attempt budget is exhausted, which means
    /// the session should be restarted instead.
    pub fn attempt_recovery(&mut self) -> bool {
        let now = Instant::now();
        match self.recovery_last {
            Some(last) if now.duration_since(last) < RECOVERY_WINDOW => {
                self.recovery_attempts += 1;
            }
            _ => self.recovery_attempts = 1,
        }
        self.recovery_last = Some(now);

        if self.recovery_attempts > MAX_RECOVERY_ATTEMPTS {
            tracing::error!(
                attempts = self.recovery_attempts,
                "recovery attempt budget exhausted"
            );
            return false;
        }

        for channel in self.channel_index.values() {
            channel.clear_queue();
        }
        self.core.stats.lock().clear_errors();
        self.core.errors.lock().reset();
        tracing::info!(attempt = self.recovery_attempts, "recovery performed");
        true
    }

    /// Rebuilds the snapshot the callback iterates, sorted by name so the
    /// per-callback processing order is deterministic.
    fn publish_channels(&self) {
        let mut channels: Vec<Arc<Channel>> = self.channel_index.values().cloned().collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        *self.core.channels.write() = Arc::new(channels);
    }
}

impl Drop for StreamRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockEnumerator;
    use crate::WriteError;

    struct MemoryWriter {
        blocks: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl MemoryWriter {
        fn new() -> (Self, Arc<Mutex<Vec<Vec<f32>>>>) {
            let blocks = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    blocks: Arc::clone(&blocks),
                },
                blocks,
            )
        }
    }

    impl BlockWriter for MemoryWriter {
        fn write_block(&mut self, block: &[f32]) -> Result<(), WriteError> {
            self.blocks.lock().push(block.to_vec());
            Ok(())
        }
    }

    struct FailingWriter;

    impl BlockWriter for FailingWriter {
        fn write_block(&mut self, _block: &[f32]) -> Result<(), WriteError> {
            Err(WriteError::custom("intentional failure"))
        }
    }

    fn router_with_memory_target(
        name: &str,
        config: RoutingConfig,
    ) -> (StreamRouter, Arc<Mutex<Vec<Vec<f32>>>>) {
        let mut router = StreamRouter::new(EngineConfig::default());
        let (writer, written) = MemoryWriter::new();
        router
            .add_channel(
                MockEnumerator::output_device(0, name),
                Box::new(writer),
                config,
            )
            .unwrap();
        (router, written)
    }

    fn block_of(level: f32, engine: &EngineConfig) -> Vec<f32> {
        vec![level; engine.samples_per_block()]
    }

    #[test]
    fn test_error_monitor_trips_past_ceiling() {
        let mut monitor = ErrorMonitor::new();
        let now = Instant::now();
        for _ in 0..MAX_ERRORS_PER_CATEGORY {
            assert!(!monitor.record(ErrorCategory::Channel, now));
        }
        assert!(monitor.record(ErrorCategory::Channel, now));
    }

    #[test]
    fn test_error_monitor_categories_are_independent() {
        let mut monitor = ErrorMonitor::new();
        let now = Instant::now();
        for _ in 0..MAX_ERRORS_PER_CATEGORY {
            monitor.record(ErrorCategory::Channel, now);
        }
        assert!(!monitor.record(ErrorCategory::Stream, now));
    }

    #[test]
    fn test_error_monitor_resets_after_quiet_window() {
        let mut monitor = ErrorMonitor::new();
        let start = Instant::now();
        for _ in 0..MAX_ERRORS_PER_CATEGORY {
            monitor.record(ErrorCategory::Channel, start);
        }
        let later = start + ERROR_RESET_WINDOW + Duration::from_secs(1);
        assert!(!monitor.record(ErrorCategory::Channel, later));
    }

    #[test]
    fn test_start_requires_targets() {
        let mut router = StreamRouter::new(EngineConfig::default());
        assert!(matches!(
            router.start_external("Line 1"),
            Err(RouteAudioError::NoTargetsConfigured)
        ));
        assert_eq!(router.state(), RouterState::Idle);
    }

    #[test]
    fn test_start_is_not_reentrant() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        assert!(matches!(
            router.start_external("Line 1"),
            Err(RouteAudioError::AlreadyRunning)
        ));
        assert_eq!(router.state(), RouterState::Running);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        let (writer, _) = MemoryWriter::new();
        assert!(matches!(
            router.add_channel(
                MockEnumerator::output_device(1, "Speakers"),
                Box::new(writer),
                RoutingConfig::default(),
            ),
            Err(RouteAudioError::DuplicateTarget { .. })
        ));
    }

    #[test]
    fn test_fan_out_reaches_all_channels() {
        let mut router = StreamRouter::new(EngineConfig::default());
        let (writer_a, written_a) = MemoryWriter::new();
        let (writer_b, written_b) = MemoryWriter::new();
        router
            .add_channel(
                MockEnumerator::output_device(0, "A"),
                Box::new(writer_a),
                RoutingConfig::default(),
            )
            .unwrap();
        router
            .add_channel(
                MockEnumerator::output_device(1, "B"),
                Box::new(writer_b),
                RoutingConfig::default(),
            )
            .unwrap();

        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        for _ in 0..5 {
            handle.process_block(&block_of(0.01, &engine));
        }

        // Zero delay holds one block back
        assert_eq!(written_a.lock().len(), 4);
        assert_eq!(written_b.lock().len(), 4);
    }

    #[test]
    fn test_disabled_channel_is_skipped() {
        let (mut router, written) =
            router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        router.channel("Speakers").unwrap().set_enabled(false);
        for _ in 0..3 {
            handle.process_block(&block_of(0.01, &engine));
        }
        assert!(written.lock().is_empty());
    }

    #[test]
    fn test_blocks_ignored_while_idle() {
        let (router, written) = router_with_memory_target("Speakers", RoutingConfig::default());
        let handle = router.handle();
        let engine = router.engine();

        handle.process_block(&block_of(0.01, &engine));
        assert!(written.lock().is_empty());
        assert_eq!(handle.stats().total_callbacks(), 0);
    }

    #[test]
    fn test_stats_recorded_per_block() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        for _ in 0..100 {
            handle.process_block(&block_of(0.01, &engine));
        }

        let stats = router.stats();
        assert_eq!(stats.total_callbacks(), 100);
        assert_eq!(stats.total_frames(), 100 * u64::from(engine.block_size));
        assert_eq!(
            stats.bytes_processed(),
            100 * u64::from(engine.block_size) * u64::from(engine.channels) * 4
        );
    }

    #[test]
    fn test_channel_failure_does_not_stall_others() {
        let mut router = StreamRouter::new(EngineConfig::default());
        let (writer_b, written_b) = MemoryWriter::new();
        router
            .add_channel(
                MockEnumerator::output_device(0, "A-failing"),
                Box::new(FailingWriter),
                RoutingConfig::default(),
            )
            .unwrap();
        router
            .add_channel(
                MockEnumerator::output_device(1, "B-healthy"),
                Box::new(writer_b),
                RoutingConfig::default(),
            )
            .unwrap();

        let errors = Arc::new(Mutex::new(0usize));
        let errors_sink = Arc::clone(&errors);
        let mut router = router.on_event(move |e| {
            if matches!(e, RouterEvent::ChannelError { .. }) {
                *errors_sink.lock() += 1;
            }
        });

        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        for _ in 0..4 {
            handle.process_block(&block_of(0.01, &engine));
        }

        // The healthy channel keeps flowing despite the failing one
        assert_eq!(written_b.lock().len(), 3);
        assert!(*errors.lock() >= 3);
        assert!(router.stats().errors() >= 3);
    }

    #[test]
    fn test_repeated_channel_errors_trip_emergency_stop() {
        let mut router = StreamRouter::new(EngineConfig::default());
        router
            .add_channel(
                MockEnumerator::output_device(0, "Broken"),
                Box::new(FailingWriter),
                RoutingConfig::default(),
            )
            .unwrap();

        let emergencies = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&emergencies);
        let mut router = router.on_event(move |e| {
            if matches!(e, RouterEvent::EmergencyStop { .. }) {
                *sink.lock() += 1;
            }
        });

        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        for _ in 0..20 {
            handle.process_block(&block_of(0.01, &engine));
        }

        assert!(handle.is_emergency());
        // Emitted exactly once at the transition
        assert_eq!(*emergencies.lock(), 1);

        // The driving loop observes the flag and tears the session down
        router.run_until_stopped();
        assert_eq!(router.state(), RouterState::Idle);
    }

    #[test]
    fn test_feedback_confirmation_suppresses_output() {
        let (router, written) = router_with_memory_target("Speakers", RoutingConfig::default());

        let confirmed = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&confirmed);
        let mut router = router.on_event(move |e| {
            if matches!(e, RouterEvent::FeedbackConfirmed { .. }) {
                *sink.lock() += 1;
            }
        });

        router.start_external("Line 1 (Virtual Audio Cable)").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        // Self-similar runaway growth: every block is a constant level,
        // so the block RMS equals the level
        let mut blocks_fed = 0;
        for i in 0..60 {
            let level = 0.005 * 1.08f32.powi(i);
            handle.process_block(&block_of(level.min(1.0), &engine));
            blocks_fed += 1;
        }

        let confirmations = *confirmed.lock();
        assert!(confirmations >= 1, "runaway growth must confirm");
        // Confirmed blocks are suppressed entirely; repeated confirmation
        // also escalates, gating the tail of the sequence
        assert!(written.lock().len() <= blocks_fed - confirmations - 1);
        assert!(router.loop_stats().loops_detected >= 1);
        assert_eq!(
            router.problematic_devices(),
            vec!["Line 1 (Virtual Audio Cable)".to_string()]
        );
    }

    #[test]
    fn test_prevent_loop_removes_channel() {
        let (router, _) = router_with_memory_target("BT Speaker", RoutingConfig::default());

        let mitigated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&mitigated);
        let mut router = router.on_event(move |e| {
            if let RouterEvent::FeedbackMitigated { device, .. } = e {
                sink.lock().push(device);
            }
        });

        router.prevent_loop("BT Speaker").unwrap();
        assert!(router.targets().is_empty());
        assert_eq!(router.loop_stats().loops_prevented, 1);
        assert_eq!(mitigated.lock().as_slice(), ["BT Speaker".to_string()]);

        assert!(matches!(
            router.prevent_loop("BT Speaker"),
            Err(RouteAudioError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_stop_resets_stats_and_state() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        handle.process_block(&block_of(0.01, &engine));
        assert_eq!(router.stats().total_callbacks(), 1);

        router.stop();
        assert_eq!(router.state(), RouterState::Idle);
        assert_eq!(router.stats().total_callbacks(), 0);

        // Idempotent
        router.stop();
        assert_eq!(router.state(), RouterState::Idle);
    }

    #[test]
    fn test_request_stop_observed_by_wait_loop() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();

        let handle = router.handle();
        handle.request_stop();
        router.run_until_stopped();
        assert_eq!(router.state(), RouterState::Idle);
    }

    #[test]
    fn test_set_stream_params_only_while_idle() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        assert!(matches!(
            router.set_stream_params(96_000, 512),
            Err(RouteAudioError::InvalidState { .. })
        ));

        router.stop();
        router.set_stream_params(96_000, 512).unwrap();
        let engine = router.engine();
        assert_eq!(engine.sample_rate, 96_000);
        assert_eq!(engine.block_size, 512);
    }

    #[test]
    fn test_high_rate_blocks_are_smoothed() {
        let mut router = StreamRouter::new(EngineConfig {
            sample_rate: 96_000,
            block_size: 256,
            channels: 2,
        });
        let (writer, written) = MemoryWriter::new();
        router
            .add_channel(
                MockEnumerator::output_device(0, "Speakers"),
                Box::new(writer),
                RoutingConfig::default(),
            )
            .unwrap();
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        let mut impulse = vec![0.0f32; engine.samples_per_block()];
        impulse[0] = 1.0;
        handle.process_block(&impulse);
        handle.process_block(&vec![0.0f32; engine.samples_per_block()]);

        let blocks = written.lock();
        assert_eq!(blocks.len(), 1);
        // The impulse leaks 10% into the next frame's left sample
        assert!((blocks[0][0] - 1.0).abs() < 1e-6);
        assert!((blocks[0][2] - 0.1).abs() < 1e-6);
        assert_eq!(blocks[0][3], 0.0);
    }

    #[test]
    fn test_live_delay_change_applies_next_block() {
        let (mut router, written) =
            router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        handle.process_block(&block_of(0.01, &engine));
        handle.process_block(&block_of(0.01, &engine));
        assert_eq!(written.lock().len(), 1);

        // Deepen the delay to two blocks: the queue holds more before
        // releasing, with no restart
        router.set_delay_ms("Speakers", 11).unwrap();
        handle.process_block(&block_of(0.01, &engine));
        assert_eq!(written.lock().len(), 1);
        handle.process_block(&block_of(0.01, &engine));
        assert_eq!(written.lock().len(), 2);
    }

    #[test]
    fn test_remove_target_takes_effect() {
        let (mut router, written) =
            router_with_memory_target("Speakers", RoutingConfig::default());
        router.start_external("Line 1").unwrap();
        let handle = router.handle();
        let engine = router.engine();

        handle.process_block(&block_of(0.01, &engine));
        router.remove_target("Speakers").unwrap();
        handle.process_block(&block_of(0.01, &engine));
        handle.process_block(&block_of(0.01, &engine));

        assert!(written.lock().is_empty());
        assert!(router.targets().is_empty());
    }

    #[test]
    fn test_recovery_budget_is_bounded() {
        let (mut router, _) = router_with_memory_target("Speakers", RoutingConfig::default());
        assert!(router.attempt_recovery());
        assert!(router.attempt_recovery());
        assert!(router.attempt_recovery());
        assert!(!router.attempt_recovery());
    }
}
