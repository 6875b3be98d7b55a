//! Result type definition.

use crate::error::Error;

/// The standard Result type for Homeo configuration and IO operations.
///
/// Engine-level failures use their own error enums in the orchestrator crate;
/// this alias covers everything that happens before the engine is running.
pub type Result<T> = std::result::Result<T, Error>;
