//! Error types and the process-wide error recorder
//!
//! Inside the audio frame errors never propagate as `Err`: the offending
//! processor records them here and substitutes a zero buffer. Outside the
//! frame (setup, commands) operations abort and leave state unchanged;
//! callers observe the failure through the returned `Result` and
//! `last_error()`.

use parking_lot::Mutex;
use thiserror::Error;

/// Error kinds shared by every Resona crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A parameter or index was outside its legal range
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A buffer or table had an unexpected size
    #[error("bad size: {0}")]
    BadSize(String),

    /// A weak service reference could not be upgraded
    #[error("null reference: {0}")]
    NullReference(String),

    /// A service or processor was used before its setup completed
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// The operation is not legal in the current state
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// A computation would divide by zero
    #[error("division by zero: {0}")]
    DivByZero(String),

    /// A switch fell through to an unhandled case
    #[error("case not defined: {0}")]
    CaseNotDefined(String),

    /// A data file could not be read or was malformed
    #[error("file error: {0}")]
    FileError(String),

    /// Non-fatal condition worth surfacing
    #[error("warning: {0}")]
    Warning(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

static LAST_ERROR: Mutex<Option<CoreError>> = Mutex::new(None);

/// Record an error as the most recent one and log it.
///
/// Warnings log at `warn` level, everything else at `error`.
pub fn record_error(error: CoreError) {
    match &error {
        CoreError::Warning(msg) => log::warn!("{msg}"),
        other => log::error!("{other}"),
    }
    *LAST_ERROR.lock() = Some(error);
}

/// Most recent recorded error, if any
pub fn last_error() -> Option<CoreError> {
    LAST_ERROR.lock().clone()
}

/// Take the most recent recorded error, clearing it
pub fn take_last_error() -> Option<CoreError> {
    LAST_ERROR.lock().take()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_take() {
        record_error(CoreError::BadSize("test buffer".into()));
        assert_eq!(
            last_error(),
            Some(CoreError::BadSize("test buffer".into()))
        );
        assert!(take_last_error().is_some());
        assert!(last_error().is_none());
    }
}
