//! Integration tests for route-audio.
//!
//! The routing chain is driven through the external-capture seam and
//! in-memory block writers so the full pipeline runs without audio
//! hardware. Tests that require actual devices are marked with
//! `#[ignore]` and should be run manually.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use route_audio::{
    device_observer, BlockWriter, CatalogFilter, DeviceCatalog, DeviceChangeMonitor,
    DeviceDescriptor, DeviceEventKind, EngineConfig, MockEnumerator, RouterEvent, RoutingConfig,
    StreamRouter, WriteError,
};

/// Collects written blocks in memory.
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

fn output_device(index: usize, name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        index,
        name: name.to_string(),
        max_input_channels: 0,
        max_output_channels: 2,
        host_api: "MME".to_string(),
        default_sample_rate: 48_000,
    }
}

#[test]
fn test_fan_out_with_independent_delay_and_gain() {
    let engine = EngineConfig::default();
    let mut router = StreamRouter::new(engine);

    let (near_writer, near_blocks) = MemoryWriter::new();
    let (far_writer, far_blocks) = MemoryWriter::new();

    // "Near" plays immediately at -6dB, "far" holds two blocks at unity
    router
        .add_channel(
            output_device(0, "Near Speakers"),
            Box::new(near_writer),
            RoutingConfig::new(0, -6.0),
        )
        .unwrap();
    router
        .add_channel(
            output_device(1, "Far Speakers"),
            Box::new(far_writer),
            RoutingConfig::new(11, 0.0),
        )
        .unwrap();

    router.start_external("Line 1 (Virtual Audio Cable)").unwrap();
    let handle = router.handle();

    for _ in 0..6 {
        handle.process_block(&vec![0.04f32; engine.samples_per_block()]);
    }

    // Zero delay: one block held back. Two-block delay: two held back.
    assert_eq!(near_blocks.lock().len(), 5);
    assert_eq!(far_blocks.lock().len(), 4);

    let attenuated = 0.04 * 10.0f32.powf(-6.0 / 20.0);
    assert!((near_blocks.lock()[0][0] - attenuated).abs() < 1e-4);
    assert!((far_blocks.lock()[0][0] - 0.04).abs() < 1e-6);

    let stats = router.stats();
    assert_eq!(stats.total_callbacks(), 6);
    assert_eq!(stats.total_frames(), 6 * u64::from(engine.block_size));

    router.stop();
}

#[test]
fn test_delay_quantization_reported_for_deep_delay() {
    let engine = EngineConfig::default();
    let mut router = StreamRouter::new(engine);
    let (writer, _) = MemoryWriter::new();
    router
        .add_channel(
            output_device(0, "Hall Speakers"),
            Box::new(writer),
            RoutingConfig::new(500, 0.0),
        )
        .unwrap();

    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notices);
    let mut router = router.on_event(move |e| {
        if let RouterEvent::DelayQuantized { chunks, .. } = e {
            sink.lock().push(chunks);
        }
    });

    router.start_external("Line 1").unwrap();
    let handle = router.handle();
    handle.process_block(&vec![0.01f32; engine.samples_per_block()]);

    // 500ms at 48kHz/256 quantizes to 93 whole blocks
    assert_eq!(notices.lock().as_slice(), &[93]);
}

#[test]
fn test_quiet_session_confirms_no_feedback() {
    let engine = EngineConfig::default();
    let mut router = StreamRouter::new(engine);
    let (writer, written) = MemoryWriter::new();
    router
        .add_channel(
            output_device(0, "Speakers"),
            Box::new(writer),
            RoutingConfig::default(),
        )
        .unwrap();

    router.start_external("Line 1").unwrap();
    let handle = router.handle();

    // Sixty blocks of constant low-level signal: never a loop
    for _ in 0..60 {
        handle.process_block(&vec![0.01f32; engine.samples_per_block()]);
    }

    assert_eq!(router.loop_stats().loops_detected, 0);
    assert_eq!(written.lock().len(), 59);
    assert!(router.problematic_devices().is_empty());
}

#[tokio::test]
async fn test_monitor_runs_alongside_routing() {
    // Inventory served to the catalog/monitor, disjoint from the routing
    // path: hot-plug events must never disturb the audio chain
    let enumerator = MockEnumerator::new();
    enumerator.set_devices(vec![
        MockEnumerator::output_device(0, "Speakers"),
        MockEnumerator::output_device(1, "Line 1 (Virtual Audio Cable)"),
    ]);
    let catalog = DeviceCatalog::new(enumerator.clone(), CatalogFilter::default());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut monitor = DeviceChangeMonitor::new(
        catalog,
        device_observer(move |event| sink.lock().push(event)),
    )
    .with_poll_interval(Duration::from_millis(20));
    monitor.start().unwrap();

    let engine = EngineConfig::default();
    let mut router = StreamRouter::new(engine);
    let (writer, written) = MemoryWriter::new();
    router
        .add_channel(
            output_device(0, "Speakers"),
            Box::new(writer),
            RoutingConfig::default(),
        )
        .unwrap();
    router.start_external("Line 1 (Virtual Audio Cable)").unwrap();
    let handle = router.handle();

    for _ in 0..10 {
        handle.process_block(&vec![0.02f32; engine.samples_per_block()]);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Hot-plug a headset mid-session
    enumerator.set_devices(vec![
        MockEnumerator::output_device(0, "Speakers"),
        MockEnumerator::output_device(1, "Line 1 (Virtual Audio Cable)"),
        MockEnumerator::output_device(2, "BT Headset"),
    ]);
    tokio::time::sleep(Duration::from_millis(80)).await;

    for _ in 0..5 {
        handle.process_block(&vec![0.02f32; engine.samples_per_block()]);
    }

    monitor.stop().await;
    router.stop();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, DeviceEventKind::Added);
    assert_eq!(events[0].device.name, "BT Headset");

    // Routing was unaffected by the monitor's activity
    assert_eq!(written.lock().len(), 14);
}

#[test]
fn test_catalog_feeds_router_targets() {
    let enumerator = MockEnumerator::new();
    enumerator.set_devices(vec![
        MockEnumerator::output_device(0, "Microsoft Sound Mapper - Output"),
        MockEnumerator::output_device(1, "Line 1 (Virtual Audio Cable)"),
        MockEnumerator::output_device(2, "Speakers (Realtek)"),
        DeviceDescriptor {
            index: 3,
            name: "BT Headset Hands-Free".to_string(),
            max_input_channels: 1,
            max_output_channels: 2,
            host_api: "MME".to_string(),
            default_sample_rate: 16_000,
        },
    ]);
    let catalog = DeviceCatalog::new(enumerator, CatalogFilter::default());

    let sources = catalog.sources().unwrap();
    let targets = catalog.targets().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].name, "Speakers (Realtek)");

    // The classified target routes cleanly
    let mut router = StreamRouter::new(EngineConfig::default());
    let (writer, _) = MemoryWriter::new();
    router
        .add_channel(targets[0].clone(), Box::new(writer), RoutingConfig::default())
        .unwrap();
    router.start_external(&sources[0].name).unwrap();
    assert_eq!(router.targets(), vec!["Speakers (Realtek)".to_string()]);
}

// Note: device tests require actual audio hardware and are skipped in CI
#[test]
#[ignore = "requires audio hardware"]
fn test_default_host_catalog_lists_devices() {
    let catalog = DeviceCatalog::with_default_host();
    let devices = catalog.list_devices().unwrap();
    for device in devices {
        println!("{device}");
    }
}
