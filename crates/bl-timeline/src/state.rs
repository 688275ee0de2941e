//! Transport state snapshot.

use crate::event::MarkerName;

/// Snapshot of the transport position of one playing event.
///
/// Field groups have distinct writers: `bpm` and `current_beat` change
/// only on beat callbacks, the `last_marker*` pair only on marker
/// callbacks, and `timeline_position_ms` only on the controller's poll
/// tick. Consumers always receive a whole copy, never the live state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimelineState {
    /// Tempo at the current playback position
    pub bpm: f32,
    /// 1-based beat index within the current bar (0 until the first beat)
    pub current_beat: u32,
    /// Raw playback cursor in milliseconds
    pub timeline_position_ms: u32,
    /// Most recently crossed marker (empty until the first)
    pub last_marker: MarkerName,
    /// Position of that marker in seconds
    pub last_marker_position_secs: f32,
}

impl TimelineState {
    /// Elapsed time in seconds, derived from the raw cursor.
    pub fn time_secs(&self) -> f32 {
        self.timeline_position_ms as f32 / 1000.0
    }
}
