//! Core timeline types for beatline.
//!
//! This crate defines the transport snapshot and the engine-native event
//! vocabulary shared by the sync layer and the engine backends. Everything
//! here is plain data; behavior lives in `bl-sync` and `bl-engine`.
//!
//! Designed to be `no_std` compatible.

#![cfg_attr(not(feature = "std"), no_std)]

mod event;
mod state;

pub use event::{
    marker_name, EventKind, EventMask, MarkerName, TimelineEvent, MARKER_NAME_CAP,
};
pub use state::TimelineState;
