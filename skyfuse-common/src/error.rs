//! Common error types for skyfuse

use thiserror::Error;

/// Common result type for skyfuse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the fusion components
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
