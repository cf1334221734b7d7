// Error types for the live effect engine
//
// This module defines custom error types for configuration and stream
// lifecycle operations, providing structured error handling with error codes
// and the status codes returned across the host bridge.

mod audio;
mod config;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use config::{log_config_error, ConfigError, ConfigErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the host bridge.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;

    /// Get the coarse status returned to the host
    fn status(&self) -> StatusCode;
}

/// Status returned from configuration and lifecycle entry points.
///
/// Numeric values match oboe's `Result` so hosts that already switch on
/// oboe codes keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    ErrorBase = -900,
    ErrorOutOfRange = -882,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Collapse a `Result` into the status handed to the host.
    pub fn from_result<T, E: ErrorCode>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(err) => err.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Ok.as_i32(), 0);
        assert_eq!(StatusCode::ErrorBase.as_i32(), -900);
        assert_eq!(StatusCode::ErrorOutOfRange.as_i32(), -882);
        assert!(StatusCode::Ok.is_ok());
        assert!(!StatusCode::ErrorBase.is_ok());
    }

    #[test]
    fn test_status_from_result() {
        let ok: Result<(), AudioError> = Ok(());
        assert_eq!(StatusCode::from_result(&ok), StatusCode::Ok);

        let err: Result<(), ConfigError> = Err(ConfigError::OutOfRange {
            field: "channelCount",
            value: 300,
        });
        assert_eq!(StatusCode::from_result(&err), StatusCode::ErrorOutOfRange);

        let err: Result<(), AudioError> = Err(AudioError::NotOpen);
        assert_eq!(StatusCode::from_result(&err), StatusCode::ErrorBase);
    }
}
