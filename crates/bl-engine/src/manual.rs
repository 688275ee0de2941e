//! Manually driven engine backend.
//!
//! A deterministic stand-in for the real engine: tests decide when
//! callbacks fire and what the cursor reads. [`ManualDriver`] is the
//! test-facing half, kept alive independently of the boxed instance the
//! controller owns.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bl_timeline::{EventMask, TimelineEvent};
use parking_lot::Mutex;

use crate::traits::{
    AudioEngine, EngineError, EventInstance, RawHandle, StopMode, TimelineCallback,
    RAW_HANDLE_NONE,
};

struct ManualCore {
    callback: Mutex<Option<(TimelineCallback, EventMask)>>,
    user_data: AtomicU64,
    position_ms: AtomicU32,
    fail_next_query: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    released: AtomicBool,
    last_stop_mode: Mutex<Option<StopMode>>,
    parameters: Mutex<Vec<(String, f32)>>,
}

impl ManualCore {
    fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            user_data: AtomicU64::new(RAW_HANDLE_NONE),
            position_ms: AtomicU32::new(0),
            fail_next_query: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            last_stop_mode: Mutex::new(None),
            parameters: Mutex::new(Vec::new()),
        }
    }
}

/// Engine whose instances are driven by hand.
pub struct ManualEngine {
    created: Mutex<Vec<ManualDriver>>,
}

impl ManualEngine {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
        }
    }

    /// Driver for the most recently created instance.
    pub fn last_instance(&self) -> Option<ManualDriver> {
        self.created.lock().last().cloned()
    }
}

impl Default for ManualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for ManualEngine {
    fn create_instance(&self, _event_ref: &str) -> Result<Box<dyn EventInstance>, EngineError> {
        let core = Arc::new(ManualCore::new());
        self.created.lock().push(ManualDriver {
            core: Arc::clone(&core),
        });
        Ok(Box::new(ManualInstance { core }))
    }
}

/// The instance half handed to the controller.
pub struct ManualInstance {
    core: Arc<ManualCore>,
}

impl ManualInstance {
    fn guard(&self) -> Result<(), EngineError> {
        if self.core.released.load(Ordering::Acquire) {
            Err(EngineError::Released)
        } else {
            Ok(())
        }
    }
}

impl EventInstance for ManualInstance {
    fn start(&mut self) -> Result<(), EngineError> {
        self.guard()?;
        self.core.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self, mode: StopMode) -> Result<(), EngineError> {
        self.guard()?;
        self.core.stopped.store(true, Ordering::Release);
        *self.core.last_stop_mode.lock() = Some(mode);
        Ok(())
    }

    fn release(&mut self) {
        if self.core.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.callback.lock().take();
    }

    fn set_parameter_by_name(&mut self, name: &str, value: f32) -> Result<(), EngineError> {
        self.guard()?;
        self.core.parameters.lock().push((name.to_string(), value));
        Ok(())
    }

    fn timeline_position(&self) -> Result<u32, EngineError> {
        self.guard()?;
        if self.core.fail_next_query.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Query("forced failure".to_string()));
        }
        Ok(self.core.position_ms.load(Ordering::Acquire))
    }

    fn set_callback(
        &mut self,
        callback: TimelineCallback,
        mask: EventMask,
    ) -> Result<(), EngineError> {
        self.guard()?;
        *self.core.callback.lock() = Some((callback, mask));
        Ok(())
    }

    fn clear_callback(&mut self) -> Result<(), EngineError> {
        self.guard()?;
        self.core.callback.lock().take();
        Ok(())
    }

    fn set_user_data(&mut self, data: RawHandle) -> Result<(), EngineError> {
        self.guard()?;
        self.core.user_data.store(data, Ordering::Release);
        Ok(())
    }

    fn user_data(&self) -> Result<RawHandle, EngineError> {
        self.guard()?;
        Ok(self.core.user_data.load(Ordering::Acquire))
    }
}

/// Test-facing driver: fires callbacks and inspects instance state.
#[derive(Clone)]
pub struct ManualDriver {
    core: Arc<ManualCore>,
}

impl ManualDriver {
    /// Deliver `event` to the registered callback, as the engine's
    /// playback thread would (mask-filtered, current user-data attached).
    pub fn fire(&self, event: &TimelineEvent) {
        let guard = self.core.callback.lock();
        if let Some((callback, mask)) = guard.as_ref() {
            if mask.contains(event.kind()) {
                let user_data = self.core.user_data.load(Ordering::Acquire);
                if let Err(err) = callback(event, user_data) {
                    log::error!("timeline callback failed: {}", err);
                }
            }
        }
    }

    /// Clone of the registered callback, if any. Lets tests simulate an
    /// invocation that is already in flight when the instance detaches.
    pub fn callback(&self) -> Option<TimelineCallback> {
        self.core
            .callback
            .lock()
            .as_ref()
            .map(|(callback, _)| Arc::clone(callback))
    }

    /// Seed the value the next position query returns.
    pub fn set_position(&self, ms: u32) {
        self.core.position_ms.store(ms, Ordering::Release);
    }

    /// Make the next position query fail once.
    pub fn fail_next_query(&self) {
        self.core.fail_next_query.store(true, Ordering::Release);
    }

    pub fn user_data(&self) -> RawHandle {
        self.core.user_data.load(Ordering::Acquire)
    }

    pub fn started(&self) -> bool {
        self.core.started.load(Ordering::Acquire)
    }

    pub fn stopped(&self) -> bool {
        self.core.stopped.load(Ordering::Acquire)
    }

    pub fn released(&self) -> bool {
        self.core.released.load(Ordering::Acquire)
    }

    pub fn last_stop_mode(&self) -> Option<StopMode> {
        *self.core.last_stop_mode.lock()
    }

    pub fn parameters(&self) -> Vec<(String, f32)> {
        self.core.parameters.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_timeline::{marker_name, EventKind};
    use std::sync::Mutex as StdMutex;

    fn recording_callback(sink: Arc<StdMutex<Vec<(EventKind, RawHandle)>>>) -> TimelineCallback {
        Arc::new(move |event, raw| {
            sink.lock().unwrap().push((event.kind(), raw));
            Ok(())
        })
    }

    #[test]
    fn fire_respects_the_mask() {
        let engine = ManualEngine::new();
        let mut instance = engine.create_instance("event:/test").unwrap();
        let driver = engine.last_instance().unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        instance
            .set_callback(recording_callback(Arc::clone(&seen)), EventMask::BEAT)
            .unwrap();

        driver.fire(&TimelineEvent::Marker {
            name: marker_name("skipped"),
            position_ms: 0,
        });
        driver.fire(&TimelineEvent::Beat {
            bar: 1,
            beat: 1,
            position_ms: 0,
            tempo: 120.0,
            time_signature: (4, 4),
        });

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventKind::Beat]);
    }

    #[test]
    fn fire_attaches_current_user_data() {
        let engine = ManualEngine::new();
        let mut instance = engine.create_instance("event:/test").unwrap();
        let driver = engine.last_instance().unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        instance
            .set_callback(recording_callback(Arc::clone(&seen)), EventMask::STOPPED)
            .unwrap();
        instance.set_user_data(0xBEEF).unwrap();
        driver.fire(&TimelineEvent::Stopped);

        assert_eq!(seen.lock().unwrap().as_slice(), &[(EventKind::Stopped, 0xBEEF)]);
    }

    #[test]
    fn release_clears_the_callback_and_rejects_calls() {
        let engine = ManualEngine::new();
        let mut instance = engine.create_instance("event:/test").unwrap();
        let driver = engine.last_instance().unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        instance
            .set_callback(recording_callback(Arc::clone(&seen)), EventMask::BEAT)
            .unwrap();
        instance.release();

        assert!(driver.callback().is_none());
        driver.fire(&TimelineEvent::Stopped);
        assert!(seen.lock().unwrap().is_empty());
        assert!(matches!(instance.start(), Err(EngineError::Released)));
        assert!(driver.released());
    }

    #[test]
    fn forced_query_failure_is_one_shot() {
        let engine = ManualEngine::new();
        let instance = engine.create_instance("event:/test").unwrap();
        let driver = engine.last_instance().unwrap();

        driver.set_position(2500);
        driver.fail_next_query();
        assert!(matches!(
            instance.timeline_position(),
            Err(EngineError::Query(_))
        ));
        assert_eq!(instance.timeline_position().unwrap(), 2500);
    }
}
