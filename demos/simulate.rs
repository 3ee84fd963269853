//! Simulated amplifier session.
//!
//! Drives the amplifier through a media playback, an incoming call and a
//! policy switch against mock hardware, printing every event.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=speaker_amp=debug cargo run --example simulate
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use speaker_amp::{
    AmplifierModule, AudioMode, DeviceId, MapProperties, MockHardware, CONTROL_MODE_KEY,
};
use tracing_subscriber::EnvFilter;

fn settle() {
    thread::sleep(Duration::from_millis(50));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Speaker Amplifier Simulation");
    println!("============================");
    println!();

    // The chip refuses the first two power-ons, as if waiting for a clock.
    let hardware = MockHardware::new().with_power_on_failures(2);
    let probe = hardware.probe();
    let properties = Arc::new(MapProperties::new());

    let amp = AmplifierModule::global()
        .builder()
        .hardware(hardware)
        .properties(properties.clone())
        .on_event(|event| {
            println!("Event: {event:?}");
        })
        .open()?;

    println!("-- media playback on speaker");
    amp.set_output_device(DeviceId::SPEAKER);
    amp.set_enabled(DeviceId::SPEAKER, true);
    amp.set_mode(AudioMode::Normal);
    amp.stream_start();
    settle();
    println!("powered: {}", probe.is_powered());

    println!("-- playback stops");
    amp.stream_standby();
    settle();
    println!("powered: {}", probe.is_powered());

    println!("-- incoming call on voice speaker");
    amp.set_output_device(DeviceId::VOICE_SPEAKER);
    amp.set_mode(AudioMode::InCall);
    amp.set_enabled(DeviceId::VOICE_SPEAKER, true);
    settle();
    println!("powered: {}", probe.is_powered());

    println!("-- call ends, switching to legacy control");
    properties.set(CONTROL_MODE_KEY, "legacy");
    amp.set_enabled(DeviceId::VOICE_SPEAKER, false);
    amp.set_mode(AudioMode::Normal);
    settle();
    println!("control mode: {}", amp.control_mode());

    let stats = amp.stats();
    println!();
    println!("Stats:");
    println!("  Passes applied:    {}", stats.passes_applied);
    println!("  Passes skipped:    {}", stats.passes_skipped);
    println!("  Power-on failures: {}", stats.power_on_failures);
    println!("  Retries abandoned: {}", stats.retries_abandoned);
    println!("  Policy switches:   {}", stats.policy_switches);

    amp.close()?;

    println!();
    println!("Hardware calls: {}", probe.calls().len());
    println!("Done!");

    Ok(())
}
