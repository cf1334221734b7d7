//! Hardware stream layer abstraction.
//!
//! The engine never talks to a driver directly. It configures a
//! [`StreamRequest`], hands the host a data callback plus an error callback,
//! and receives an owning [`HardwareStream`] back. Three hosts implement the
//! capability: [`SimulatedHost`] (deterministic, every platform), `CpalHost`
//! (desktop) and `OboeHost` (Android).
//!
//! The enum values mirror oboe's integer codes so host-side configuration
//! can be passed through unchanged.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod simulated;
pub use simulated::{HostCall, HostOp, SimulatedHost};

#[cfg(not(target_os = "android"))]
mod cpal_host;
#[cfg(not(target_os = "android"))]
pub use cpal_host::{CpalHost, DeviceInfo};

#[cfg(target_os = "android")]
mod oboe_host;
#[cfg(target_os = "android")]
pub use oboe_host::OboeHost;

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Value returned by a data callback to the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    Stop,
}

/// Audio API selection (`NATIVE_MODE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioApi {
    Unspecified,
    OpenSLES,
    AAudio,
}

impl AudioApi {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AudioApi::Unspecified),
            1 => Some(AudioApi::OpenSLES),
            2 => Some(AudioApi::AAudio),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            AudioApi::Unspecified => 0,
            AudioApi::OpenSLES => 1,
            AudioApi::AAudio => 2,
        }
    }
}

/// Sample format. Only 16-bit signed PCM is carried through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,
    Float,
    I24,
    I32,
}

impl SampleFormat {
    /// `Unspecified` (0) resolves to the engine format.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 | 1 => Some(SampleFormat::I16),
            2 => Some(SampleFormat::Float),
            3 => Some(SampleFormat::I24),
            4 => Some(SampleFormat::I32),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::Float | SampleFormat::I32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingMode {
    Exclusive,
    Shared,
}

impl SharingMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SharingMode::Exclusive),
            1 => Some(SharingMode::Shared),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMode {
    None,
    PowerSaving,
    LowLatency,
}

impl PerformanceMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(PerformanceMode::None),
            11 => Some(PerformanceMode::PowerSaving),
            12 => Some(PerformanceMode::LowLatency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputPreset {
    Generic,
    Camcorder,
    VoiceRecognition,
    VoiceCommunication,
    Unprocessed,
    VoicePerformance,
}

impl InputPreset {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(InputPreset::Generic),
            5 => Some(InputPreset::Camcorder),
            6 => Some(InputPreset::VoiceRecognition),
            7 => Some(InputPreset::VoiceCommunication),
            9 => Some(InputPreset::Unprocessed),
            10 => Some(InputPreset::VoicePerformance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Usage {
    Media,
    VoiceCommunication,
    VoiceCommunicationSignalling,
    Alarm,
    Notification,
    NotificationRingtone,
    NotificationEvent,
    AssistanceAccessibility,
    AssistanceNavigationGuidance,
    AssistanceSonification,
    Game,
    Assistant,
}

impl Usage {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Usage::Media),
            2 => Some(Usage::VoiceCommunication),
            3 => Some(Usage::VoiceCommunicationSignalling),
            4 => Some(Usage::Alarm),
            5 => Some(Usage::Notification),
            6 => Some(Usage::NotificationRingtone),
            10 => Some(Usage::NotificationEvent),
            11 => Some(Usage::AssistanceAccessibility),
            12 => Some(Usage::AssistanceNavigationGuidance),
            13 => Some(Usage::AssistanceSonification),
            14 => Some(Usage::Game),
            16 => Some(Usage::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRateConversionQuality {
    None,
    Fastest,
    Low,
    Medium,
    High,
    Best,
}

impl SampleRateConversionQuality {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SampleRateConversionQuality::None),
            1 => Some(SampleRateConversionQuality::Fastest),
            2 => Some(SampleRateConversionQuality::Low),
            3 => Some(SampleRateConversionQuality::Medium),
            4 => Some(SampleRateConversionQuality::High),
            5 => Some(SampleRateConversionQuality::Best),
            _ => None,
        }
    }
}

/// Audio session selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionId {
    None,
    Allocate,
    Id(i32),
}

impl SessionId {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(SessionId::None),
            0 => Some(SessionId::Allocate),
            id if id > 0 => Some(SessionId::Id(id)),
            _ => None,
        }
    }
}

/// Everything a host needs to open one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub direction: Direction,
    /// 0 selects the system default device.
    pub device_id: i32,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    pub frames_per_callback: u32,
    pub audio_api: AudioApi,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub input_preset: InputPreset,
    pub usage: Usage,
    pub session_id: SessionId,
    pub channel_conversion_allowed: bool,
    pub format_conversion_allowed: bool,
    pub rate_conversion_quality: SampleRateConversionQuality,
}

/// Snapshot of a stream's negotiated properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProperties {
    pub direction: Direction,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub buffer_capacity_frames: u32,
    pub frames_per_callback: u32,
    pub performance_mode: PerformanceMode,
}

/// Failures reported by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    Disconnected,
    IllegalArgument,
    InvalidState,
    InvalidFormat,
    InvalidRate,
    Unavailable,
    Timeout,
    Closed,
    Unimplemented,
    Backend(String),
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::Disconnected => f.write_str("stream disconnected"),
            HalError::IllegalArgument => f.write_str("illegal argument"),
            HalError::InvalidState => f.write_str("invalid stream state"),
            HalError::InvalidFormat => f.write_str("invalid format"),
            HalError::InvalidRate => f.write_str("invalid sample rate"),
            HalError::Unavailable => f.write_str("device unavailable"),
            HalError::Timeout => f.write_str("timeout"),
            HalError::Closed => f.write_str("stream closed"),
            HalError::Unimplemented => f.write_str("not implemented by host"),
            HalError::Backend(details) => write!(f, "backend error: {}", details),
        }
    }
}

impl std::error::Error for HalError {}

/// Data callback of an input stream. Runs on the hardware's real-time thread.
pub trait InputCallback: Send {
    /// `frames` holds `num_frames * channel_count` interleaved samples.
    fn on_audio_ready(&mut self, stream: &StreamProperties, frames: &[i16]) -> CallbackResult;
}

/// Data callback of an output stream. Runs on the hardware's real-time thread.
pub trait OutputCallback: Send {
    /// `frames` must be filled completely; it holds `num_frames * channel_count` samples.
    fn on_audio_ready(&mut self, stream: &StreamProperties, frames: &mut [i16]) -> CallbackResult;
}

/// Asynchronous error notifications. Delivered on a host callback thread,
/// never on the thread that controls the stream.
pub trait ErrorCallback: Send + Sync {
    fn on_error_before_close(&self, stream: &StreamProperties, error: &HalError);
    fn on_error_after_close(&self, stream: &StreamProperties, error: &HalError);
}

/// One opened hardware stream. Dropping it releases the hardware handle.
pub trait HardwareStream: Send {
    fn properties(&self) -> StreamProperties;

    /// Request a buffer size; returns the size actually applied.
    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HalError>;

    fn request_start(&mut self) -> Result<(), HalError>;

    fn request_stop(&mut self) -> Result<(), HalError>;

    /// Blocking close. Once it returns no callback is running or will run.
    fn close(&mut self) -> Result<(), HalError>;
}

/// The hardware capability the engine configures and calls.
pub trait AudioHost: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_input(
        &self,
        request: &StreamRequest,
        callback: Box<dyn InputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError>;

    fn open_output(
        &self,
        request: &StreamRequest,
        callback: Box<dyn OutputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError>;

    fn is_aaudio_recommended(&self) -> bool {
        false
    }
}

/// Host for the current platform: Oboe on Android, cpal elsewhere.
pub fn default_host() -> Arc<dyn AudioHost> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "android")] {
            Arc::new(OboeHost::new())
        } else {
            Arc::new(CpalHost::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oboe_codes_resolve() {
        assert_eq!(AudioApi::from_code(2), Some(AudioApi::AAudio));
        assert_eq!(AudioApi::from_code(3), None);
        assert_eq!(SampleFormat::from_code(0), Some(SampleFormat::I16));
        assert_eq!(SharingMode::from_code(1), Some(SharingMode::Shared));
        assert_eq!(
            PerformanceMode::from_code(12),
            Some(PerformanceMode::LowLatency)
        );
        assert_eq!(
            InputPreset::from_code(7),
            Some(InputPreset::VoiceCommunication)
        );
        assert_eq!(Usage::from_code(2), Some(Usage::VoiceCommunication));
        assert_eq!(Usage::from_code(7), None);
        assert_eq!(
            SampleRateConversionQuality::from_code(3),
            Some(SampleRateConversionQuality::Medium)
        );
    }

    #[test]
    fn test_session_id_codes() {
        assert_eq!(SessionId::from_code(-1), Some(SessionId::None));
        assert_eq!(SessionId::from_code(0), Some(SessionId::Allocate));
        assert_eq!(SessionId::from_code(42), Some(SessionId::Id(42)));
        assert_eq!(SessionId::from_code(-2), None);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Input.to_string(), "input");
        assert_eq!(Direction::Output.to_string(), "output");
    }
}
