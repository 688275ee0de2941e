//! Error type for the sync layer.

use bl_engine::EngineError;

use crate::controller::PlaybackState;

/// Error type for sync operations.
#[derive(Debug)]
pub enum SyncError {
    /// A stale, cleared, or unregistered slot handle
    InvalidHandle,
    /// Operation not valid in the current lifecycle state
    InvalidState {
        op: &'static str,
        state: PlaybackState,
    },
    /// The engine reported a failure
    Engine(EngineError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::InvalidHandle => write!(f, "stale or unregistered timeline slot handle"),
            SyncError::InvalidState { op, state } => {
                write!(f, "{} is not valid in the {:?} state", op, state)
            }
            SyncError::Engine(err) => write!(f, "engine error: {}", err),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<EngineError> for SyncError {
    fn from(err: EngineError) -> Self {
        SyncError::Engine(err)
    }
}
