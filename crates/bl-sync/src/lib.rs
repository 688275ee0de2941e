//! Cross-thread timeline sync for beatline.
//!
//! An audio engine reports beat and marker crossings through a callback
//! on its own playback thread; the host's main thread polls the cursor,
//! reads transport state, and controls the instance lifecycle. This
//! crate owns the boundary between the two: a handle-addressed slot
//! arena for the shared state, an event bridge that turns callbacks
//! into slot writes and listener notifications, and a playback
//! controller that enforces the lifecycle state machine.
//!
//! # Consistency model
//!
//! Each field group of [`bl_timeline::TimelineState`] has exactly one
//! writer thread: the engine callback writes the beat and marker
//! fields, the controller's [`PlaybackController::tick`] writes the
//! cursor position. Poll-sourced and callback-sourced fields can
//! therefore skew by up to one tick relative to each other. That skew
//! is part of the contract: test per-group values or compare whole
//! [`SharedSlot::snapshot`] copies, never cross-group equalities at a
//! single instant.
//!
//! Listeners run on the engine thread. They must return quickly and
//! must not call back into the controller.

mod bridge;
mod controller;
mod error;
mod slot;

pub use bridge::EventBridge;
pub use controller::{PlaybackController, PlaybackState};
pub use error::SyncError;
pub use slot::{SharedSlot, SlotArena, SlotId};
