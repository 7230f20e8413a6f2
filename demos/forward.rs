//! Forwarding example.
//!
//! Routes the preferred capture source to every usable target device,
//! with a half-second delay on the first target, while the device monitor
//! reports hot-plug events in the background.
//!
//! Run with: cargo run --example forward

use std::time::Duration;

use route_audio::{
    device_observer, DeviceCatalog, DeviceChangeMonitor, EngineConfig, RouterEvent, RoutingConfig,
    StreamRouter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let catalog = DeviceCatalog::with_default_host();
    let sources = catalog.sources()?;
    let targets = catalog.targets()?;

    let Some(source) = sources.first() else {
        eprintln!("No capture source found (install a virtual audio cable)");
        return Ok(());
    };
    if targets.is_empty() {
        eprintln!("No target devices found");
        return Ok(());
    }

    println!("Source: {}", source.name);
    for target in &targets {
        println!("Target: {}", target.name);
    }

    let mut router = StreamRouter::new(EngineConfig::default()).on_event(|event| match event {
        RouterEvent::FeedbackConfirmed { device, .. } => {
            eprintln!("Feedback loop on '{device}', output suppressed");
        }
        RouterEvent::DelayQuantized {
            device,
            requested_ms,
            effective_ms,
            ..
        } => {
            println!("'{device}': {requested_ms}ms requested, {effective_ms:.1}ms effective");
        }
        other => eprintln!("{other:?}"),
    });

    for (i, target) in targets.iter().enumerate() {
        let config = if i == 0 {
            RoutingConfig::new(500, 0.0)
        } else {
            RoutingConfig::default()
        };
        if let Err(e) = router.add_target(target, config) {
            eprintln!("Skipping '{}': {e}", target.name);
        }
    }

    let mut monitor = DeviceChangeMonitor::new(
        DeviceCatalog::with_default_host(),
        device_observer(|event| println!("Device {:?}: {}", event.kind, event.device.name)),
    );
    monitor.start()?;

    router.start(source)?;
    println!("Routing for 30 seconds...");

    // Stop from a background task after a fixed run; snapshot the
    // session stats first, since stopping resets them
    let handle = router.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let stats = handle.stats();
        println!(
            "Done: {} callbacks, {} frames routed",
            stats.total_callbacks(),
            stats.total_frames()
        );
        handle.request_stop();
    });

    tokio::task::block_in_place(|| router.run_until_stopped());
    monitor.stop().await;

    Ok(())
}
