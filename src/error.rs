//! Error types for the Hotspot crate.
//!
//! Admission checks never fail; these errors only surface while loading
//! configuration and rules.

use thiserror::Error;

/// Main error type for Hotspot operations.
#[derive(Error, Debug)]
pub enum HotspotError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A hotspot rule failed validation or could not be parsed
    #[error("Invalid hotspot rule: {0}")]
    InvalidRule(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Hotspot operations.
pub type Result<T> = std::result::Result<T, HotspotError>;
