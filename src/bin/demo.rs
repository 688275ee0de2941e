//! beatline demo: play a scripted timeline and print transport state.
//!
//! Run with `RUST_LOG=debug` for bridge-level diagnostics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bl_engine::{ScriptedEngine, TimelineScript};
use bl_sync::{PlaybackController, PlaybackState};
use env_logger::Env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let engine = ScriptedEngine::new();
    engine.register(
        "event:/music/demo",
        TimelineScript::new(120.0)
            .length_ms(8_000)
            .tempo_change(4_000, 140.0)
            .marker(0, "Intro")
            .marker(2_000, "Verse")
            .marker(6_000, "Chorus"),
    );

    let mut controller = PlaybackController::new();

    let beats = Arc::new(AtomicUsize::new(0));
    let beat_count = Arc::clone(&beats);
    controller.on_beat(move || {
        beat_count.fetch_add(1, Ordering::Relaxed);
    });
    controller.on_marker(|| log::info!("marker crossed"));

    controller.create(&engine, "event:/music/demo")?;
    controller.play()?;
    controller.set_parameter("intensity", 0.8)?;

    let started = Instant::now();
    let mut last_print = Instant::now();
    while started.elapsed() < Duration::from_millis(8_300) {
        controller.tick();
        if last_print.elapsed() >= Duration::from_millis(500) {
            last_print = Instant::now();
            let state = controller.current_state();
            log::info!(
                "t={:.2}s bpm={} beat={} marker={:?} ({:.2}s)",
                state.time_secs(),
                state.bpm,
                state.current_beat,
                state.last_marker.as_str(),
                state.last_marker_position_secs,
            );
        }
        thread::sleep(Duration::from_millis(16));
    }

    controller.stop(false);
    assert_eq!(controller.state(), PlaybackState::Released);
    log::info!("done: {} beats", beats.load(Ordering::Relaxed));
    Ok(())
}
