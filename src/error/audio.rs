// Audio error types and constants

use crate::engine::StreamState;
use crate::error::{ErrorCode, StatusCode};
use crate::hal::{Direction, HalError};
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes carried by [`AudioError`].
///
/// Error code range: 1001-1012
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Streams are already open
    pub const ALREADY_OPEN: i32 = 1001;

    /// Operation requires open streams
    pub const NOT_OPEN: i32 = 1002;

    /// Hardware refused to open a stream
    pub const STREAM_OPEN_FAILED: i32 = 1003;

    /// Negotiated sample rate differs from the requested one
    pub const SAMPLE_RATE_MISMATCH: i32 = 1004;

    /// Negotiated channel count differs from the requested one
    pub const CHANNEL_COUNT_MISMATCH: i32 = 1005;

    /// Negotiated buffer capacity cannot hold one period
    pub const BUFFER_CAPACITY_TOO_SMALL: i32 = 1006;

    /// Hardware refused to start a stream
    pub const STREAM_START_FAILED: i32 = 1007;

    /// Hardware refused to stop a stream
    pub const STREAM_STOP_FAILED: i32 = 1008;

    /// Hardware refused to close a stream
    pub const STREAM_CLOSE_FAILED: i32 = 1009;

    /// Stream state machine rejected a transition
    pub const INVALID_TRANSITION: i32 = 1010;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1011;

    /// Real-time callback saw a period of unexpected size
    pub const CALLBACK_FAULT: i32 = 1012;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=DuplexEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover stream open/start/stop/close, negotiation checks and
/// faults detected on the real-time callback threads.
///
/// Error code ranges: 1001-1012
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Streams are already open
    AlreadyOpen,

    /// Streams are not open
    NotOpen,

    /// Failed to open audio stream
    StreamOpenFailed { direction: Direction, source: HalError },

    /// Hardware altered the sample rate
    SampleRateMismatch {
        direction: Direction,
        requested: u32,
        negotiated: u32,
    },

    /// Hardware altered the channel count
    ChannelCountMismatch {
        direction: Direction,
        requested: u16,
        negotiated: u16,
    },

    /// One period does not fit into the negotiated buffer
    BufferCapacityTooSmall {
        direction: Direction,
        required_bytes: usize,
        capacity_bytes: usize,
    },

    /// Failed to start audio stream
    StreamStartFailed { direction: Direction, source: HalError },

    /// Failed to stop audio stream
    StreamStopFailed { direction: Direction, source: HalError },

    /// Failed to close audio stream
    StreamCloseFailed { direction: Direction, source: HalError },

    /// Stream state machine rejected a transition
    InvalidTransition {
        direction: Direction,
        from: StreamState,
        to: StreamState,
    },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// A callback received a period whose size breaks the configured layout
    CallbackFault {
        direction: Direction,
        expected_bytes: usize,
        actual_bytes: usize,
    },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::AlreadyOpen => AudioErrorCodes::ALREADY_OPEN,
            AudioError::NotOpen => AudioErrorCodes::NOT_OPEN,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::SampleRateMismatch { .. } => AudioErrorCodes::SAMPLE_RATE_MISMATCH,
            AudioError::ChannelCountMismatch { .. } => AudioErrorCodes::CHANNEL_COUNT_MISMATCH,
            AudioError::BufferCapacityTooSmall { .. } => {
                AudioErrorCodes::BUFFER_CAPACITY_TOO_SMALL
            }
            AudioError::StreamStartFailed { .. } => AudioErrorCodes::STREAM_START_FAILED,
            AudioError::StreamStopFailed { .. } => AudioErrorCodes::STREAM_STOP_FAILED,
            AudioError::StreamCloseFailed { .. } => AudioErrorCodes::STREAM_CLOSE_FAILED,
            AudioError::InvalidTransition { .. } => AudioErrorCodes::INVALID_TRANSITION,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::CallbackFault { .. } => AudioErrorCodes::CALLBACK_FAULT,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::AlreadyOpen => {
                "Streams already open. Call close_streams() first.".to_string()
            }
            AudioError::NotOpen => "Streams not open. Call open_streams() first.".to_string(),
            AudioError::StreamOpenFailed { direction, source } => {
                format!("Failed to open {} stream: {}", direction, source)
            }
            AudioError::SampleRateMismatch {
                direction,
                requested,
                negotiated,
            } => format!(
                "{} stream sample rate mismatch: requested {} Hz, got {} Hz",
                direction, requested, negotiated
            ),
            AudioError::ChannelCountMismatch {
                direction,
                requested,
                negotiated,
            } => format!(
                "{} stream channel count mismatch: requested {}, got {}",
                direction, requested, negotiated
            ),
            AudioError::BufferCapacityTooSmall {
                direction,
                required_bytes,
                capacity_bytes,
            } => format!(
                "{} stream buffer capacity too small: need {} bytes, got {}",
                direction, required_bytes, capacity_bytes
            ),
            AudioError::StreamStartFailed { direction, source } => {
                format!("Failed to start {} stream: {}", direction, source)
            }
            AudioError::StreamStopFailed { direction, source } => {
                format!("Failed to stop {} stream: {}", direction, source)
            }
            AudioError::StreamCloseFailed { direction, source } => {
                format!("Failed to close {} stream: {}", direction, source)
            }
            AudioError::InvalidTransition {
                direction,
                from,
                to,
            } => format!(
                "{} stream cannot move from {:?} to {:?}",
                direction, from, to
            ),
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::CallbackFault {
                direction,
                expected_bytes,
                actual_bytes,
            } => format!(
                "{} callback expected {} bytes per period, got {}",
                direction, expected_bytes, actual_bytes
            ),
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::ErrorBase
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(AudioError::AlreadyOpen.code(), AudioErrorCodes::ALREADY_OPEN);
        assert_eq!(AudioError::NotOpen.code(), AudioErrorCodes::NOT_OPEN);
        assert_eq!(
            AudioError::StreamOpenFailed {
                direction: Direction::Output,
                source: HalError::Unavailable,
            }
            .code(),
            AudioErrorCodes::STREAM_OPEN_FAILED
        );
        assert_eq!(
            AudioError::SampleRateMismatch {
                direction: Direction::Input,
                requested: 16000,
                negotiated: 48000,
            }
            .code(),
            1004
        );
        assert_eq!(
            AudioError::CallbackFault {
                direction: Direction::Input,
                expected_bytes: 640,
                actual_bytes: 512,
            }
            .code(),
            1012
        );
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::SampleRateMismatch {
            direction: Direction::Input,
            requested: 16000,
            negotiated: 48000,
        };
        assert_eq!(
            err.message(),
            "input stream sample rate mismatch: requested 16000 Hz, got 48000 Hz"
        );

        let err = AudioError::StreamOpenFailed {
            direction: Direction::Output,
            source: HalError::Disconnected,
        };
        assert!(err.message().contains("output"));
        assert!(err.message().contains("disconnected"));

        let err = AudioError::InvalidTransition {
            direction: Direction::Input,
            from: StreamState::Closed,
            to: StreamState::Running,
        };
        assert!(err.message().contains("Closed"));
    }

    #[test]
    fn test_audio_errors_report_error_base() {
        assert_eq!(AudioError::NotOpen.status(), StatusCode::ErrorBase);
        assert_eq!(
            AudioError::LockPoisoned {
                component: "engine".to_string()
            }
            .status(),
            StatusCode::ErrorBase
        );
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NotOpen;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
