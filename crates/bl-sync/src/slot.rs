//! Shared timeline slots and the handle arena.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bl_engine::{RawHandle, RAW_HANDLE_NONE};
use bl_timeline::{MarkerName, TimelineState};
use parking_lot::Mutex;
use slotmap::{Key, KeyData, SlotMap};

use crate::error::SyncError;

slotmap::new_key_type! {
    /// Handle for a shared timeline slot in the arena.
    ///
    /// Generational: a handle to a released slot fails resolution instead
    /// of reaching freed state, even if the index is reused.
    pub struct SlotId;
}

impl SlotId {
    /// Raw token form, suitable for engine user-data.
    pub fn to_raw(self) -> RawHandle {
        self.data().as_ffi()
    }

    /// Rebuild a handle from its raw token form.
    pub fn from_raw(raw: RawHandle) -> SlotId {
        KeyData::from_ffi(raw).into()
    }
}

/// The single writable copy of one instance's timeline state.
///
/// Numeric fields are atomics; the marker pair sits behind one mutex
/// because name and position must change together. Each write path has
/// exactly one calling thread: `apply_beat`/`apply_marker` run on the
/// engine callback thread, `set_position_ms` on the controller's poll
/// tick. Readers copy the whole state out with [`SharedSlot::snapshot`].
pub struct SharedSlot {
    /// f32 tempo stored as bits
    bpm_bits: AtomicU32,
    current_beat: AtomicU32,
    position_ms: AtomicU32,
    last_marker: Mutex<(MarkerName, f32)>,
}

impl SharedSlot {
    fn new() -> Self {
        Self {
            bpm_bits: AtomicU32::new(0.0_f32.to_bits()),
            current_beat: AtomicU32::new(0),
            position_ms: AtomicU32::new(0),
            last_marker: Mutex::new((MarkerName::new(), 0.0)),
        }
    }

    /// Callback-path write: a beat boundary was crossed.
    pub fn apply_beat(&self, beat: u32, tempo: f32) {
        self.current_beat.store(beat, Ordering::Release);
        self.bpm_bits.store(tempo.to_bits(), Ordering::Release);
    }

    /// Callback-path write: a marker was crossed.
    pub fn apply_marker(&self, name: &MarkerName, position_ms: u32) {
        let mut marker = self.last_marker.lock();
        marker.0 = *name;
        marker.1 = position_ms as f32 / 1000.0;
    }

    /// Poll-path write: the raw cursor position.
    pub fn set_position_ms(&self, ms: u32) {
        self.position_ms.store(ms, Ordering::Release);
    }

    /// Copy the current state out.
    pub fn snapshot(&self) -> TimelineState {
        let (last_marker, last_marker_position_secs) = *self.last_marker.lock();
        TimelineState {
            bpm: f32::from_bits(self.bpm_bits.load(Ordering::Acquire)),
            current_beat: self.current_beat.load(Ordering::Acquire),
            timeline_position_ms: self.position_ms.load(Ordering::Acquire),
            last_marker,
            last_marker_position_secs,
        }
    }
}

/// Arena of live slots.
///
/// Owns the slot allocations and controls exactly when each one is
/// invalidated. Callers must detach the engine callback before
/// [`SlotArena::release`]; a raw handle that arrives afterwards fails
/// [`SlotArena::resolve_raw`] instead of touching freed memory.
pub struct SlotArena {
    slots: Mutex<SlotMap<SlotId, Arc<SharedSlot>>>,
}

impl SlotArena {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Allocate a zero-initialized slot.
    pub fn insert(&self) -> (SlotId, Arc<SharedSlot>) {
        let slot = Arc::new(SharedSlot::new());
        let id = self.slots.lock().insert(Arc::clone(&slot));
        (id, slot)
    }

    /// Look up a live slot.
    pub fn resolve(&self, id: SlotId) -> Result<Arc<SharedSlot>, SyncError> {
        self.slots
            .lock()
            .get(id)
            .cloned()
            .ok_or(SyncError::InvalidHandle)
    }

    /// Look up a live slot from its raw token form.
    pub fn resolve_raw(&self, raw: RawHandle) -> Result<Arc<SharedSlot>, SyncError> {
        if raw == RAW_HANDLE_NONE {
            return Err(SyncError::InvalidHandle);
        }
        self.resolve(SlotId::from_raw(raw))
    }

    /// Invalidate `id`. The handle never resolves again.
    pub fn release(&self, id: SlotId) -> Result<(), SyncError> {
        self.slots
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or(SyncError::InvalidHandle)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SlotArena {
    fn default() -> Self {
        Self::new()
    }
}
