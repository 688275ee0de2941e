//! Engine-native timeline events and the callback registration mask.

use arrayvec::ArrayString;

/// Maximum marker name length in bytes.
pub const MARKER_NAME_CAP: usize = 64;

/// Fixed-capacity marker name. Copying one never touches the heap, so
/// names can cross the callback boundary allocation-free.
pub type MarkerName = ArrayString<MARKER_NAME_CAP>;

/// Build a [`MarkerName`] from a str, truncating at capacity on a char
/// boundary.
pub fn marker_name(name: &str) -> MarkerName {
    let mut out = MarkerName::new();
    for ch in name.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

/// A callback payload delivered by the engine's playback thread.
///
/// Beat payloads carry the engine's full beat properties; most consumers
/// only need `beat` and `tempo`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelineEvent {
    /// Playback started
    Started,
    /// The cursor crossed a beat boundary
    Beat {
        /// 1-based bar number
        bar: u32,
        /// 1-based beat within the bar
        beat: u32,
        /// Position of the boundary in milliseconds
        position_ms: u32,
        /// Tempo at the boundary
        tempo: f32,
        /// Time signature (upper, lower)
        time_signature: (u8, u8),
    },
    /// The cursor crossed a named marker
    Marker {
        name: MarkerName,
        position_ms: u32,
    },
    /// Playback stopped, by request or at the end of the timeline
    Stopped,
}

impl TimelineEvent {
    /// The fieldless kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            TimelineEvent::Started => EventKind::Started,
            TimelineEvent::Beat { .. } => EventKind::Beat,
            TimelineEvent::Marker { .. } => EventKind::Marker,
            TimelineEvent::Stopped => EventKind::Stopped,
        }
    }
}

/// Kinds of timeline events an instance can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Beat,
    Marker,
    Stopped,
}

impl EventKind {
    const fn bit(self) -> u32 {
        match self {
            EventKind::Started => 1 << 0,
            EventKind::Beat => 1 << 1,
            EventKind::Marker => 1 << 2,
            EventKind::Stopped => 1 << 3,
        }
    }
}

/// Set of event kinds a callback is registered for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const STARTED: EventMask = EventMask(EventKind::Started.bit());
    pub const BEAT: EventMask = EventMask(EventKind::Beat.bit());
    pub const MARKER: EventMask = EventMask(EventKind::Marker.bit());
    pub const STOPPED: EventMask = EventMask(EventKind::Stopped.bit());

    /// Does the mask include `kind`?
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl core::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_name_fits() {
        let name = marker_name("Verse");
        assert_eq!(name.as_str(), "Verse");
    }

    #[test]
    fn marker_name_truncates_at_capacity() {
        let long = "x".repeat(MARKER_NAME_CAP + 10);
        let name = marker_name(&long);
        assert_eq!(name.len(), MARKER_NAME_CAP);
    }

    #[test]
    fn marker_name_truncates_on_char_boundary() {
        // 2-byte chars: 32 fit exactly, the 33rd must be dropped whole
        let long = "é".repeat(40);
        let name = marker_name(&long);
        assert_eq!(name.len(), MARKER_NAME_CAP);
        assert!(name.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn event_kind_mapping() {
        let beat = TimelineEvent::Beat {
            bar: 1,
            beat: 1,
            position_ms: 0,
            tempo: 120.0,
            time_signature: (4, 4),
        };
        assert_eq!(beat.kind(), EventKind::Beat);

        let marker = TimelineEvent::Marker {
            name: marker_name("A"),
            position_ms: 0,
        };
        assert_eq!(marker.kind(), EventKind::Marker);
        assert_eq!(TimelineEvent::Started.kind(), EventKind::Started);
        assert_eq!(TimelineEvent::Stopped.kind(), EventKind::Stopped);
    }

    #[test]
    fn mask_contains() {
        let mask = EventMask::BEAT | EventMask::MARKER;
        assert!(mask.contains(EventKind::Beat));
        assert!(mask.contains(EventKind::Marker));
        assert!(!mask.contains(EventKind::Stopped));
        assert!(!mask.contains(EventKind::Started));
        assert!(!EventMask::NONE.contains(EventKind::Beat));
    }
}
