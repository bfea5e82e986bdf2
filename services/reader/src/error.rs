//! services/reader/src/error.rs
//!
//! Defines the primary error type for the reader service.

use crate::config::ConfigError;
use crate::engine::EngineError;
use recitation_core::ports::PortError;

/// The primary error type for the `reader` service.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error raised by the playback engine itself.
    #[error("Engine Error: {0}")]
    Engine(#[from] EngineError),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
