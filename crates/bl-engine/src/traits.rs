//! Instance-control traits and error types.

use std::sync::Arc;

use bl_timeline::{EventMask, TimelineEvent};

/// Error type for engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// Failed to create an event instance
    InstanceCreate(String),
    /// Timeline/position query failed
    Query(String),
    /// Operation on an already-released instance
    Released,
    /// Command queue to the playback thread is full
    CommandQueue,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InstanceCreate(msg) => write!(f, "instance create error: {}", msg),
            EngineError::Query(msg) => write!(f, "timeline query error: {}", msg),
            EngineError::Released => write!(f, "instance already released"),
            EngineError::CommandQueue => write!(f, "playback command queue full"),
        }
    }
}

impl std::error::Error for EngineError {}

/// How an instance should stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// Let the engine run a short fade before stopping
    AllowFadeout,
    /// Stop at the next playback-thread iteration
    Immediate,
}

/// Opaque user-data token bound to an instance.
///
/// The engine stores the value verbatim and hands it back with every
/// callback invocation; it never interprets it.
pub type RawHandle = u64;

/// The cleared user-data value. Never resolves to a live slot.
pub const RAW_HANDLE_NONE: RawHandle = 0;

/// Callback registered with an instance: one stable entry point plus the
/// instance's current user-data token, the native two-part contract.
///
/// Runs on the engine's playback thread. An error return is logged by
/// the engine and otherwise ignored; there is no recovery path on that
/// thread.
pub type TimelineCallback =
    Arc<dyn Fn(&TimelineEvent, RawHandle) -> Result<(), EngineError> + Send + Sync>;

/// Factory for playable event instances.
pub trait AudioEngine {
    /// Create an instance of the event at `event_ref`.
    fn create_instance(&self, event_ref: &str) -> Result<Box<dyn EventInstance>, EngineError>;
}

/// Control surface of one playable event instance.
pub trait EventInstance: Send {
    /// Start playback.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop playback. Once this returns, no further callback fires for
    /// this instance.
    fn stop(&mut self, mode: StopMode) -> Result<(), EngineError>;

    /// Release engine-side resources. The instance is unusable afterwards;
    /// every later call fails with [`EngineError::Released`].
    fn release(&mut self);

    /// Set a named parameter on the instance.
    fn set_parameter_by_name(&mut self, name: &str, value: f32) -> Result<(), EngineError>;

    /// Current playback cursor in milliseconds.
    fn timeline_position(&self) -> Result<u32, EngineError>;

    /// Register `callback` for the event kinds in `mask`.
    fn set_callback(
        &mut self,
        callback: TimelineCallback,
        mask: EventMask,
    ) -> Result<(), EngineError>;

    /// Unregister the callback. Blocks until any in-flight invocation has
    /// returned, so the caller may free callback-reachable state once
    /// this call completes.
    fn clear_callback(&mut self) -> Result<(), EngineError>;

    /// Bind the opaque user-data token delivered with every callback.
    fn set_user_data(&mut self, data: RawHandle) -> Result<(), EngineError>;

    /// The currently bound user-data token.
    fn user_data(&self) -> Result<RawHandle, EngineError>;
}
