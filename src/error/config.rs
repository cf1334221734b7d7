// Configuration error types and constants

use crate::error::{ErrorCode, StatusCode};
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 2001-2004
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// A value lies outside its accepted range
    pub const OUT_OF_RANGE: i32 = 2001;

    /// Period length does not yield a whole number of frames
    pub const PERIOD_NOT_INTEGRAL: i32 = 2002;

    /// A policy-fixed field was given a non-default value
    pub const POLICY_FIXED: i32 = 2003;

    /// Configuration cannot change while streams are open
    pub const STREAMS_ACTIVE: i32 = 2004;
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=EngineConfig, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while resolving [`crate::config::ConfigOptions`].
///
/// Rejection happens before any engine state is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Value outside the accepted range (or an unknown enum code)
    OutOfRange { field: &'static str, value: i64 },

    /// `sampleRate * periodLenMs / 1000` is not a whole frame count
    PeriodNotIntegral { sample_rate: u32, period_ms: u32 },

    /// Field accepted by the bridge but fixed by engine policy
    PolicyFixed { field: &'static str, value: i64 },

    /// Streams are open; configuration is immutable per session
    StreamsActive,
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::OutOfRange { .. } => ConfigErrorCodes::OUT_OF_RANGE,
            ConfigError::PeriodNotIntegral { .. } => ConfigErrorCodes::PERIOD_NOT_INTEGRAL,
            ConfigError::PolicyFixed { .. } => ConfigErrorCodes::POLICY_FIXED,
            ConfigError::StreamsActive => ConfigErrorCodes::STREAMS_ACTIVE,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::OutOfRange { field, value } => {
                format!("{} out of range (got {})", field, value)
            }
            ConfigError::PeriodNotIntegral {
                sample_rate,
                period_ms,
            } => format!(
                "{} ms at {} Hz is not a whole number of frames",
                period_ms, sample_rate
            ),
            ConfigError::PolicyFixed { field, value } => format!(
                "{} is fixed by engine policy and cannot be set to {}",
                field, value
            ),
            ConfigError::StreamsActive => {
                "Streams are open. Close them before reconfiguring.".to_string()
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ConfigError::OutOfRange { .. } | ConfigError::PeriodNotIntegral { .. } => {
                StatusCode::ErrorOutOfRange
            }
            ConfigError::PolicyFixed { .. } | ConfigError::StreamsActive => StatusCode::ErrorBase,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}
