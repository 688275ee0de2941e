//! Playback controller: instance lifecycle and the polling write path.

use std::sync::Arc;

use bl_engine::{AudioEngine, EventInstance, StopMode};
use bl_timeline::TimelineState;

use crate::bridge::EventBridge;
use crate::error::SyncError;
use crate::slot::{SharedSlot, SlotId};

/// Lifecycle states of a playback controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// No instance created yet
    Idle,
    /// Instance created and wired, not yet started
    Starting,
    /// Instance started; `tick` polls the cursor
    Playing,
    /// Teardown in progress
    Stopping,
    /// Instance and slot released; terminal
    Released,
}

/// Owns one event instance, its shared slot, and the bridge wiring.
///
/// One controller maps to one instance, one slot, and one handle; the
/// quadruple is created together in [`create`](Self::create) and torn
/// down together in [`stop`](Self::stop). Re-playing after a stop means
/// a new controller.
pub struct PlaybackController {
    bridge: EventBridge,
    instance: Option<Box<dyn EventInstance>>,
    slot: Option<(SlotId, Arc<SharedSlot>)>,
    state: PlaybackState,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            bridge: EventBridge::new(),
            instance: None,
            slot: None,
            state: PlaybackState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    // --- Lifecycle ---

    /// Create the engine instance for `event_ref` and wire the bridge.
    pub fn create(&mut self, engine: &dyn AudioEngine, event_ref: &str) -> Result<(), SyncError> {
        if self.state != PlaybackState::Idle {
            return Err(SyncError::InvalidState {
                op: "create",
                state: self.state,
            });
        }
        let mut instance = engine.create_instance(event_ref)?;
        let (id, slot) = self.bridge.attach(instance.as_mut())?;
        self.instance = Some(instance);
        self.slot = Some((id, slot));
        self.state = PlaybackState::Starting;
        Ok(())
    }

    /// Start playback. No-op if already playing.
    pub fn play(&mut self) -> Result<(), SyncError> {
        match self.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Starting => {
                if let Some(instance) = self.instance.as_mut() {
                    instance.start()?;
                }
                self.state = PlaybackState::Playing;
                Ok(())
            }
            state => Err(SyncError::InvalidState { op: "play", state }),
        }
    }

    /// Poll the engine cursor into the shared slot. Call once per frame.
    ///
    /// This is the only state write on the controller's own thread; beat
    /// and marker fields arrive through the engine callback. A failed
    /// query is logged and the previous cursor value kept.
    pub fn tick(&mut self) {
        if !matches!(self.state, PlaybackState::Starting | PlaybackState::Playing) {
            return;
        }
        let (Some(instance), Some((_, slot))) = (self.instance.as_ref(), self.slot.as_ref())
        else {
            return;
        };
        match instance.timeline_position() {
            Ok(ms) => slot.set_position_ms(ms),
            Err(err) => log::warn!("timeline position query failed: {}", err),
        }
    }

    /// Stop playback and release the instance, slot, and handle.
    ///
    /// Teardown order is load-bearing: the callback is detached before
    /// the slot is released, so an invocation already in flight either
    /// completes against live state or resolves a stale handle. It never
    /// touches freed memory. Harmless no-op when nothing is live.
    pub fn stop(&mut self, immediate: bool) {
        match self.state {
            PlaybackState::Starting | PlaybackState::Playing => {}
            _ => return,
        }
        self.state = PlaybackState::Stopping;

        let mode = if immediate {
            StopMode::Immediate
        } else {
            StopMode::AllowFadeout
        };
        if let Some(mut instance) = self.instance.take() {
            self.bridge.detach(instance.as_mut());
            if let Err(err) = instance.stop(mode) {
                log::warn!("engine stop failed: {}", err);
            }
            instance.release();
        }
        if let Some((id, _)) = self.slot.take() {
            let _ = self.bridge.release_slot(id);
        }
        self.state = PlaybackState::Released;
        log::debug!("playback controller released");
    }

    /// Forward a parameter change to the live instance.
    pub fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), SyncError> {
        match self.state {
            PlaybackState::Starting | PlaybackState::Playing => {
                let Some(instance) = self.instance.as_mut() else {
                    return Err(SyncError::InvalidState {
                        op: "set_parameter",
                        state: self.state,
                    });
                };
                instance.set_parameter_by_name(name, value)?;
                Ok(())
            }
            state => Err(SyncError::InvalidState {
                op: "set_parameter",
                state,
            }),
        }
    }

    // --- Reads & subscriptions ---

    /// Immutable copy of the current timeline state. Zeroed default when
    /// no instance is live.
    pub fn current_state(&self) -> TimelineState {
        match &self.slot {
            Some((_, slot)) => slot.snapshot(),
            None => TimelineState::default(),
        }
    }

    /// Register a beat listener. Runs on the engine thread; read fields
    /// back via [`current_state`](Self::current_state).
    pub fn on_beat(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.bridge.on_beat(listener);
    }

    /// Register a marker listener. Runs on the engine thread.
    pub fn on_marker(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.bridge.on_marker(listener);
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackController {
    /// Last-resort teardown: no engine callback may outlive the host.
    fn drop(&mut self) {
        if matches!(self.state, PlaybackState::Starting | PlaybackState::Playing) {
            self.stop(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_engine::{EngineError, ManualEngine, ScriptedEngine, TimelineScript};
    use bl_timeline::{marker_name, TimelineEvent};

    fn beat(beat: u32, tempo: f32) -> TimelineEvent {
        TimelineEvent::Beat {
            bar: 1,
            beat,
            position_ms: 0,
            tempo,
            time_signature: (4, 4),
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        assert_eq!(controller.state(), PlaybackState::Idle);

        controller.create(&engine, "event:/music/level1").unwrap();
        assert_eq!(controller.state(), PlaybackState::Starting);

        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!(engine.last_instance().unwrap().started());

        controller.stop(true);
        assert_eq!(controller.state(), PlaybackState::Released);
        let driver = engine.last_instance().unwrap();
        assert!(driver.stopped());
        assert!(driver.released());
        assert_eq!(driver.last_stop_mode(), Some(StopMode::Immediate));
    }

    #[test]
    fn play_is_idempotent_while_playing() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();
        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn play_before_create_fails() {
        let mut controller = PlaybackController::new();
        assert!(matches!(
            controller.play(),
            Err(SyncError::InvalidState { op: "play", .. })
        ));
    }

    #[test]
    fn create_twice_fails() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        assert!(matches!(
            controller.create(&engine, "event:/x"),
            Err(SyncError::InvalidState { op: "create", .. })
        ));
    }

    #[test]
    fn create_surfaces_engine_failure() {
        let engine = ScriptedEngine::new();
        let mut controller = PlaybackController::new();
        assert!(matches!(
            controller.create(&engine, "event:/missing"),
            Err(SyncError::Engine(EngineError::InstanceCreate(_)))
        ));
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn scripted_engine_wires_end_to_end() {
        let engine = ScriptedEngine::new();
        engine.register("event:/music/demo", TimelineScript::new(120.0).length_ms(50));
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/music/demo").unwrap();
        controller.play().unwrap();
        controller.stop(true);
        assert_eq!(controller.state(), PlaybackState::Released);
    }

    #[test]
    fn tick_polls_position_into_state() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();

        let driver = engine.last_instance().unwrap();
        driver.set_position(2500);
        controller.tick();

        let state = controller.current_state();
        assert_eq!(state.timeline_position_ms, 2500);
        assert_eq!(state.time_secs(), 2.5);
    }

    #[test]
    fn failed_poll_keeps_previous_position() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();

        let driver = engine.last_instance().unwrap();
        driver.set_position(1000);
        controller.tick();
        assert_eq!(controller.current_state().timeline_position_ms, 1000);

        driver.fail_next_query();
        driver.set_position(9999);
        controller.tick();
        assert_eq!(controller.current_state().timeline_position_ms, 1000);

        controller.tick();
        assert_eq!(controller.current_state().timeline_position_ms, 9999);
    }

    #[test]
    fn set_parameter_forwards_in_starting_and_playing() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.set_parameter("intensity", 0.5).unwrap();
        controller.play().unwrap();
        controller.set_parameter("intensity", 0.9).unwrap();

        let driver = engine.last_instance().unwrap();
        assert_eq!(
            driver.parameters(),
            vec![("intensity".to_string(), 0.5), ("intensity".to_string(), 0.9)]
        );
    }

    #[test]
    fn set_parameter_fails_when_idle_or_released() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        assert!(matches!(
            controller.set_parameter("x", 1.0),
            Err(SyncError::InvalidState {
                op: "set_parameter",
                state: PlaybackState::Idle,
            })
        ));

        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();
        controller.stop(true);
        assert!(matches!(
            controller.set_parameter("x", 1.0),
            Err(SyncError::InvalidState {
                op: "set_parameter",
                state: PlaybackState::Released,
            })
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();
        controller.stop(false);
        let after_first = controller.state();
        controller.stop(false);
        assert_eq!(controller.state(), after_first);
        assert_eq!(controller.state(), PlaybackState::Released);
        assert_eq!(
            engine.last_instance().unwrap().last_stop_mode(),
            Some(StopMode::AllowFadeout)
        );
    }

    #[test]
    fn stop_before_create_is_a_no_op() {
        let mut controller = PlaybackController::new();
        controller.stop(true);
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn stop_detaches_before_releasing_the_slot() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();

        let driver = engine.last_instance().unwrap();
        let raw = driver.user_data();
        let callback = driver.callback().unwrap();
        controller.stop(true);

        // The engine saw its user-data cleared and callback removed
        assert_eq!(driver.user_data(), bl_engine::RAW_HANDLE_NONE);
        assert!(driver.callback().is_none());

        // A callback that was already in flight resolves a stale handle
        // and returns cleanly
        assert!(callback(&beat(1, 120.0), raw).is_ok());
    }

    #[test]
    fn callbacks_update_state_through_the_controller() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();

        let driver = engine.last_instance().unwrap();
        driver.fire(&beat(1, 120.0));
        let state = controller.current_state();
        assert_eq!(state.current_beat, 1);
        assert_eq!(state.bpm, 120.0);

        driver.fire(&TimelineEvent::Marker {
            name: marker_name("Verse"),
            position_ms: 4000,
        });
        let state = controller.current_state();
        assert_eq!(state.last_marker.as_str(), "Verse");
        assert_eq!(state.last_marker_position_secs, 4.0);
    }

    #[test]
    fn current_state_is_zeroed_outside_a_live_instance() {
        let engine = ManualEngine::new();
        let mut controller = PlaybackController::new();
        assert_eq!(controller.current_state(), TimelineState::default());

        controller.create(&engine, "event:/x").unwrap();
        controller.play().unwrap();
        engine.last_instance().unwrap().fire(&beat(4, 140.0));
        controller.stop(true);
        assert_eq!(controller.current_state(), TimelineState::default());
    }

    #[test]
    fn drop_while_playing_stops_the_instance() {
        let engine = ManualEngine::new();
        let driver = {
            let mut controller = PlaybackController::new();
            controller.create(&engine, "event:/x").unwrap();
            controller.play().unwrap();
            engine.last_instance().unwrap()
        };
        assert!(driver.stopped());
        assert!(driver.released());
        assert_eq!(driver.last_stop_mode(), Some(StopMode::Immediate));
    }
}
