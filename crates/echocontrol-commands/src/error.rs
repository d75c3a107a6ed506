//! Error types for vendor commands.

use thiserror::Error;

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Command error types.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Pipeline, session or transport failure.
    #[error(transparent)]
    Session(#[from] echocontrol_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The vendor accepted the request but reported errors in the body.
    #[error("Vendor reported {} error(s)", .0.len())]
    VendorErrors(Vec<serde_json::Value>),

    /// No routine has a trigger with this utterance.
    #[error("Routine not found: {0}")]
    RoutineNotFound(String),
}
