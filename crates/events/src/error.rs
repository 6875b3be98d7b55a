//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The bus was dropped; no further events will arrive.
    #[error("event channel closed")]
    ChannelClosed,

    /// No matching event is buffered right now.
    #[error("no event available")]
    Empty,
}
