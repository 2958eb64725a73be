//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbodeError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),

    /// Inconsistent episode/step identifiers given to the sequence packer.
    ///
    /// Records are never dropped or merged silently when this is raised.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// An operation was called in a state where it is not allowed,
    /// e.g. two `async_step` calls without `wait_step` in between.
    #[error("Usage error: {0}")]
    UsageError(String),

    /// A simulation worker died or failed while stepping or resetting.
    ///
    /// This is fatal for the whole controller.
    #[error("Worker failure in slot {slot}: {message}")]
    WorkerFailure {
        /// Original index of the slot whose worker failed.
        slot: usize,
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration or arguments rejected at the call boundary.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl AbodeError {
    /// Returns `true` for [`AbodeError::DataIntegrityError`].
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::DataIntegrityError(_))
    }

    /// Returns `true` for [`AbodeError::UsageError`].
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::UsageError(_))
    }

    /// Returns `true` for [`AbodeError::WorkerFailure`].
    pub fn is_worker_failure(&self) -> bool {
        matches!(self, Self::WorkerFailure { .. })
    }

    /// Returns `true` for [`AbodeError::ConfigurationError`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }
}
