//! Audio engine seam for beatline.
//!
//! The real audio engine is an external collaborator; this crate defines
//! the narrow instance-control interface the sync layer consumes, plus
//! two backends: a scripted engine that plays an authored timeline on a
//! real playback thread, and a manually stepped engine for deterministic
//! tests.

mod manual;
mod scripted;
mod traits;

pub use manual::{ManualDriver, ManualEngine, ManualInstance};
pub use scripted::{ScriptedEngine, ScriptedInstance, TimelineScript};
pub use traits::{
    AudioEngine, EngineError, EventInstance, RawHandle, StopMode, TimelineCallback,
    RAW_HANDLE_NONE,
};
