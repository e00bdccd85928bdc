//! Errors that end an invocation before any resource is touched

use thiserror::Error;

/// Fatal invocation-level failures with a meaning of their own.
///
/// Provider failures stay `anyhow` errors with context; these variants are
/// the ones the handler reports specially.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// Every invalid input property, collected in one pass
    #[error("Invalid resource properties:\n  - {}", errors.join("\n  - "))]
    ParameterValidation { errors: Vec<String> },

    /// A landing-zone prerequisite could not be read
    #[error("Prerequisite parameter '{parameter}' is missing")]
    PrerequisiteMissing { parameter: String },

    /// The event is neither a lifecycle request nor a fan-out message
    #[error("Unsupported event: {reason}")]
    UnsupportedEvent { reason: String },
}
