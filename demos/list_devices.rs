//! Lists the device inventory as the catalog classifies it.
//!
//! Run with: cargo run --example list_devices

use route_audio::DeviceCatalog;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let catalog = DeviceCatalog::with_default_host();

    println!("Sources:");
    for device in catalog.sources()? {
        println!("  {device}");
    }

    println!("Targets:");
    for device in catalog.targets()? {
        println!("  {device}");
    }

    println!("Full inventory:");
    for device in catalog.list_devices()? {
        println!("  {device}");
    }

    Ok(())
}
