//! Event bridge: engine callbacks in, slot writes and notifications out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bl_engine::{EventInstance, RawHandle, TimelineCallback, RAW_HANDLE_NONE};
use bl_timeline::{EventMask, TimelineEvent};
use parking_lot::Mutex;

use crate::error::SyncError;
use crate::slot::{SharedSlot, SlotArena, SlotId};

type Listener = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    beat: Mutex<Vec<Listener>>,
    marker: Mutex<Vec<Listener>>,
}

/// Translates engine callback invocations into shared-slot writes and
/// ordered listener notification.
///
/// The dispatch path runs on the engine's playback thread and performs
/// no heap allocation. Errors never propagate back into the engine: a
/// stale handle is logged and swallowed, a panicking listener is caught
/// and the remaining listeners still run.
pub struct EventBridge {
    arena: Arc<SlotArena>,
    listeners: Arc<Listeners>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self {
            arena: Arc::new(SlotArena::new()),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Bind a fresh slot to `instance` and register the dispatch callback
    /// for beat, marker, and stop events.
    ///
    /// The slot's raw handle becomes the instance user-data; the callback
    /// captures only the arena and listener registries, never the slot,
    /// so teardown ordering stays in the caller's hands.
    pub fn attach(
        &self,
        instance: &mut dyn EventInstance,
    ) -> Result<(SlotId, Arc<SharedSlot>), SyncError> {
        let (id, slot) = self.arena.insert();

        let arena = Arc::clone(&self.arena);
        let listeners = Arc::clone(&self.listeners);
        let callback: TimelineCallback = Arc::new(move |event, raw| {
            dispatch(&arena, &listeners, event, raw);
            Ok(())
        });

        let wired = instance.set_user_data(id.to_raw()).and_then(|_| {
            instance.set_callback(
                callback,
                EventMask::BEAT | EventMask::MARKER | EventMask::STOPPED,
            )
        });
        if let Err(err) = wired {
            let _ = self.arena.release(id);
            return Err(err.into());
        }
        Ok((id, slot))
    }

    /// Unregister the callback and clear the bound user-data.
    ///
    /// User-data is cleared first so a callback racing this call resolves
    /// the cleared sentinel instead of a live handle; clearing the
    /// callback then blocks until any in-flight invocation has returned.
    /// Safe to call repeatedly or on a released instance.
    pub fn detach(&self, instance: &mut dyn EventInstance) {
        let _ = instance.set_user_data(RAW_HANDLE_NONE);
        let _ = instance.clear_callback();
    }

    /// Invalidate a slot handle. Only call after the owning instance's
    /// callback is detached.
    pub fn release_slot(&self, id: SlotId) -> Result<(), SyncError> {
        self.arena.release(id)
    }

    /// Register a beat listener. Runs on the engine thread, after the
    /// beat fields are written, in registration order.
    pub fn on_beat(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.beat.lock().push(Box::new(listener));
    }

    /// Register a marker listener. Runs on the engine thread, before the
    /// marker fields are written, in registration order.
    pub fn on_marker(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.marker.lock().push(Box::new(listener));
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(arena: &SlotArena, listeners: &Listeners, event: &TimelineEvent, raw: RawHandle) {
    let slot = match arena.resolve_raw(raw) {
        Ok(slot) => slot,
        Err(_) => {
            log::warn!("timeline callback for a released slot (raw {:#x})", raw);
            return;
        }
    };

    match event {
        TimelineEvent::Beat { beat, tempo, .. } => {
            slot.apply_beat(*beat, *tempo);
            notify(&listeners.beat, "beat");
        }
        // Markers notify before the state write, beats after. Both
        // orderings are kept as-is: consumers may rely on either.
        TimelineEvent::Marker { name, position_ms } => {
            notify(&listeners.marker, "marker");
            slot.apply_marker(name, *position_ms);
        }
        TimelineEvent::Stopped => {
            log::debug!("timeline stopped");
        }
        _ => {}
    }
}

fn notify(list: &Mutex<Vec<Listener>>, kind: &str) {
    let listeners = list.lock();
    for listener in listeners.iter() {
        if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
            log::error!("{} listener panicked", kind);
        }
    }
}
