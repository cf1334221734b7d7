//! Engine configuration
//!
//! The host hands the engine a flat set of named options ([`ConfigOptions`],
//! camelCase keys, oboe integer codes). They are validated once by
//! [`EngineConfig::resolve`] into an immutable per-session [`EngineConfig`]
//! before any stream is touched. Options can also be loaded from a JSON
//! file for the desktop CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::hal::{
    AudioApi, Direction, InputPreset, PerformanceMode, SampleFormat, SampleRateConversionQuality,
    SessionId, SharingMode, StreamRequest, Usage,
};

/// Sample rate used when the host passes 0.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Callback cadence used when the host does not pick one.
pub const DEFAULT_PERIOD_MS: u32 = 20;

const BYTES_PER_SAMPLE: usize = 2;
const MAX_PERIOD_MS: u32 = 1000;
const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 192_000;
const MAX_CHANNEL_COUNT: i32 = 256;

/// Flat option set exchanged with the host bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigOptions {
    /// Callback cadence in milliseconds
    pub period_len_ms: i32,
    /// 0 Unspecified, 1 OpenSLES, 2 AAudio
    pub native_api: i32,
    /// 0 selects the engine default
    pub sample_rate: i32,
    /// 0 selects mono
    pub channel_count: i32,
    pub format: i32,
    pub sharing_mode: i32,
    pub performance_mode: i32,
    pub input_preset: i32,
    pub usage: i32,
    pub record_device_id: i32,
    pub playback_device_id: i32,
    pub session_id: i32,
    pub channel_conversion_allowed: bool,
    pub format_conversion_allowed: bool,
    pub rate_conversion_quality: i32,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            period_len_ms: DEFAULT_PERIOD_MS as i32,
            native_api: AudioApi::AAudio.code(),
            sample_rate: DEFAULT_SAMPLE_RATE as i32,
            channel_count: 1,
            format: 1,
            sharing_mode: 1,
            performance_mode: 12,
            input_preset: 7,
            usage: 2,
            record_device_id: 0,
            playback_device_id: 0,
            session_id: -1,
            channel_conversion_allowed: true,
            format_conversion_allowed: true,
            rate_conversion_quality: 3,
        }
    }
}

impl ConfigOptions {
    /// Load options from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Parsed options. A missing file or invalid JSON falls back to the
    /// defaults with a warning. Missing keys take their default values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(options) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    options
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

/// Period arithmetic shared by both callback handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodLayout {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub period_ms: u32,
    pub frames_per_period: u32,
}

impl PeriodLayout {
    pub fn new(sample_rate: u32, channel_count: u16, period_ms: u32) -> Self {
        Self {
            sample_rate,
            channel_count,
            period_ms,
            frames_per_period: sample_rate * period_ms / 1000,
        }
    }

    /// Interleaved i16 samples in one period.
    pub fn period_samples(&self) -> usize {
        self.frames_per_period as usize * self.channel_count as usize
    }

    /// `bufferSizeBytes`: one period of 16-bit PCM.
    pub fn period_bytes(&self) -> usize {
        self.period_samples() * BYTES_PER_SAMPLE
    }

    /// Bytes one period occupies on a stream running at `sample_rate` with
    /// `channel_count` channels.
    pub fn expected_bytes(&self, sample_rate: u32, channel_count: u16) -> usize {
        let frames = sample_rate as usize * self.period_ms as usize / 1000;
        frames * BYTES_PER_SAMPLE * channel_count as usize
    }

    /// Bytes held by a stream buffer of `frames` frames.
    pub fn capacity_bytes(&self, frames: u32) -> usize {
        frames as usize * self.channel_count as usize * BYTES_PER_SAMPLE
    }

    /// Buffer size requested after open: double buffering of one period.
    pub fn low_latency_buffer_frames(&self) -> u32 {
        self.frames_per_period * 2
    }
}

/// Validated, immutable per-session configuration.
///
/// The two device selectors are the only fields the engine changes after
/// resolution; they take effect on the next open.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub audio_api: AudioApi,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub period_ms: u32,
    pub format: SampleFormat,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub input_preset: InputPreset,
    pub usage: Usage,
    pub record_device_id: i32,
    pub playback_device_id: i32,
    pub session_id: SessionId,
    pub channel_conversion_allowed: bool,
    pub format_conversion_allowed: bool,
    pub rate_conversion_quality: SampleRateConversionQuality,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_api: AudioApi::AAudio,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: 1,
            period_ms: DEFAULT_PERIOD_MS,
            format: SampleFormat::I16,
            sharing_mode: SharingMode::Shared,
            performance_mode: PerformanceMode::LowLatency,
            input_preset: InputPreset::VoiceCommunication,
            usage: Usage::VoiceCommunication,
            record_device_id: 0,
            playback_device_id: 0,
            session_id: SessionId::None,
            channel_conversion_allowed: true,
            format_conversion_allowed: true,
            rate_conversion_quality: SampleRateConversionQuality::Medium,
        }
    }
}

/// Resolve a policy-fixed field: unknown codes are out of range, known but
/// different values are refused.
fn fixed<T: PartialEq>(
    field: &'static str,
    code: i32,
    parsed: Option<T>,
    required: T,
) -> Result<T, ConfigError> {
    match parsed {
        None => Err(ConfigError::OutOfRange {
            field,
            value: code as i64,
        }),
        Some(value) if value == required => Ok(value),
        Some(_) => Err(ConfigError::PolicyFixed {
            field,
            value: code as i64,
        }),
    }
}

fn in_range<T>(field: &'static str, code: i32, parsed: Option<T>) -> Result<T, ConfigError> {
    parsed.ok_or(ConfigError::OutOfRange {
        field,
        value: code as i64,
    })
}

impl EngineConfig {
    /// Validate host options
    ///
    /// # Errors
    /// * `ConfigError::OutOfRange` - value outside its range or unknown code
    /// * `ConfigError::PeriodNotIntegral` - period is not a whole frame count
    /// * `ConfigError::PolicyFixed` - non-default value for a fixed field
    pub fn resolve(options: &ConfigOptions) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        if !(1..=MAX_PERIOD_MS as i32).contains(&options.period_len_ms) {
            return Err(ConfigError::OutOfRange {
                field: "periodLenMs",
                value: options.period_len_ms as i64,
            });
        }
        let period_ms = options.period_len_ms as u32;

        let sample_rate = match options.sample_rate {
            0 => DEFAULT_SAMPLE_RATE,
            rate if (MIN_SAMPLE_RATE as i32..=MAX_SAMPLE_RATE as i32).contains(&rate) => {
                rate as u32
            }
            rate => {
                return Err(ConfigError::OutOfRange {
                    field: "sampleRate",
                    value: rate as i64,
                })
            }
        };

        let channel_count = match options.channel_count {
            0 => 1,
            count if (1..=MAX_CHANNEL_COUNT).contains(&count) => count as u16,
            count => {
                return Err(ConfigError::OutOfRange {
                    field: "channelCount",
                    value: count as i64,
                })
            }
        };

        if (sample_rate * period_ms) % 1000 != 0 {
            return Err(ConfigError::PeriodNotIntegral {
                sample_rate,
                period_ms,
            });
        }

        let audio_api = in_range(
            "nativeApi",
            options.native_api,
            AudioApi::from_code(options.native_api),
        )?;
        let session_id = in_range(
            "sessionId",
            options.session_id,
            SessionId::from_code(options.session_id),
        )?;
        let rate_conversion_quality = in_range(
            "rateConversionQuality",
            options.rate_conversion_quality,
            SampleRateConversionQuality::from_code(options.rate_conversion_quality),
        )?;
        if options.record_device_id < 0 {
            return Err(ConfigError::OutOfRange {
                field: "recordDeviceId",
                value: options.record_device_id as i64,
            });
        }
        if options.playback_device_id < 0 {
            return Err(ConfigError::OutOfRange {
                field: "playbackDeviceId",
                value: options.playback_device_id as i64,
            });
        }

        let format = fixed(
            "format",
            options.format,
            SampleFormat::from_code(options.format),
            defaults.format,
        )?;
        let sharing_mode = fixed(
            "sharingMode",
            options.sharing_mode,
            SharingMode::from_code(options.sharing_mode),
            defaults.sharing_mode,
        )?;
        let performance_mode = fixed(
            "performanceMode",
            options.performance_mode,
            PerformanceMode::from_code(options.performance_mode),
            defaults.performance_mode,
        )?;
        let input_preset = fixed(
            "inputPreset",
            options.input_preset,
            InputPreset::from_code(options.input_preset),
            defaults.input_preset,
        )?;
        let usage = fixed(
            "usage",
            options.usage,
            Usage::from_code(options.usage),
            defaults.usage,
        )?;

        Ok(Self {
            audio_api,
            sample_rate,
            channel_count,
            period_ms,
            format,
            sharing_mode,
            performance_mode,
            input_preset,
            usage,
            record_device_id: options.record_device_id,
            playback_device_id: options.playback_device_id,
            session_id,
            channel_conversion_allowed: options.channel_conversion_allowed,
            format_conversion_allowed: options.format_conversion_allowed,
            rate_conversion_quality,
        })
    }

    pub fn layout(&self) -> PeriodLayout {
        PeriodLayout::new(self.sample_rate, self.channel_count, self.period_ms)
    }

    /// Input stream request at the configured rate.
    pub fn input_request(&self) -> StreamRequest {
        self.request(Direction::Input, self.record_device_id, self.sample_rate)
    }

    /// Output stream request. `sample_rate` is the input's negotiated rate.
    pub fn output_request(&self, sample_rate: u32) -> StreamRequest {
        self.request(Direction::Output, self.playback_device_id, sample_rate)
    }

    fn request(&self, direction: Direction, device_id: i32, sample_rate: u32) -> StreamRequest {
        StreamRequest {
            direction,
            device_id,
            sample_rate,
            channel_count: self.channel_count,
            format: self.format,
            frames_per_callback: self.layout().frames_per_period,
            audio_api: self.audio_api,
            sharing_mode: self.sharing_mode,
            performance_mode: self.performance_mode,
            input_preset: self.input_preset,
            usage: self.usage,
            session_id: self.session_id,
            channel_conversion_allowed: self.channel_conversion_allowed,
            format_conversion_allowed: self.format_conversion_allowed,
            rate_conversion_quality: self.rate_conversion_quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_resolve() {
        let config = EngineConfig::resolve(&ConfigOptions::default()).unwrap();
        assert_eq!(config, EngineConfig::default());

        let layout = config.layout();
        assert_eq!(layout.frames_per_period, 320);
        assert_eq!(layout.period_samples(), 320);
        assert_eq!(layout.period_bytes(), 640);
        assert_eq!(layout.low_latency_buffer_frames(), 640);
    }

    #[test]
    fn test_buffer_size_formula() {
        for (rate, ms, channels) in [(16000, 20, 1), (48000, 10, 2), (44100, 10, 1), (8000, 5, 4)]
        {
            let layout = PeriodLayout::new(rate, channels, ms);
            let expected = rate as usize * ms as usize / 1000 * 2 * channels as usize;
            assert_eq!(layout.period_bytes(), expected);
            assert_eq!(layout.expected_bytes(rate, channels), expected);
        }
    }

    #[test]
    fn test_channel_count_bounds() {
        let mut options = ConfigOptions {
            channel_count: 300,
            ..ConfigOptions::default()
        };
        assert_eq!(
            EngineConfig::resolve(&options),
            Err(ConfigError::OutOfRange {
                field: "channelCount",
                value: 300
            })
        );

        options.channel_count = 256;
        assert_eq!(EngineConfig::resolve(&options).unwrap().channel_count, 256);

        options.channel_count = 0;
        assert_eq!(EngineConfig::resolve(&options).unwrap().channel_count, 1);

        options.channel_count = -1;
        assert!(EngineConfig::resolve(&options).is_err());
    }

    #[test]
    fn test_rejects_unknown_api_and_session() {
        let options = ConfigOptions {
            native_api: 7,
            ..ConfigOptions::default()
        };
        assert!(matches!(
            EngineConfig::resolve(&options),
            Err(ConfigError::OutOfRange {
                field: "nativeApi",
                ..
            })
        ));

        let options = ConfigOptions {
            session_id: -5,
            ..ConfigOptions::default()
        };
        assert!(matches!(
            EngineConfig::resolve(&options),
            Err(ConfigError::OutOfRange {
                field: "sessionId",
                ..
            })
        ));
    }

    #[test]
    fn test_sample_rate_zero_uses_default() {
        let options = ConfigOptions {
            sample_rate: 0,
            ..ConfigOptions::default()
        };
        assert_eq!(
            EngineConfig::resolve(&options).unwrap().sample_rate,
            DEFAULT_SAMPLE_RATE
        );
    }

    #[test]
    fn test_period_must_be_whole_frames() {
        let options = ConfigOptions {
            sample_rate: 44100,
            period_len_ms: 3,
            ..ConfigOptions::default()
        };
        assert_eq!(
            EngineConfig::resolve(&options),
            Err(ConfigError::PeriodNotIntegral {
                sample_rate: 44100,
                period_ms: 3
            })
        );
    }

    #[test]
    fn test_policy_fixed_fields() {
        let options = ConfigOptions {
            sharing_mode: 0,
            ..ConfigOptions::default()
        };
        assert_eq!(
            EngineConfig::resolve(&options),
            Err(ConfigError::PolicyFixed {
                field: "sharingMode",
                value: 0
            })
        );

        let options = ConfigOptions {
            usage: 99,
            ..ConfigOptions::default()
        };
        assert!(matches!(
            EngineConfig::resolve(&options),
            Err(ConfigError::OutOfRange { field: "usage", .. })
        ));

        // Unspecified format resolves to the engine format.
        let options = ConfigOptions {
            format: 0,
            ..ConfigOptions::default()
        };
        assert_eq!(
            EngineConfig::resolve(&options).unwrap().format,
            SampleFormat::I16
        );
    }

    #[test]
    fn test_output_request_follows_input_rate() {
        let config = EngineConfig {
            playback_device_id: 4,
            ..EngineConfig::default()
        };
        let request = config.output_request(48000);
        assert_eq!(request.direction, Direction::Output);
        assert_eq!(request.sample_rate, 48000);
        assert_eq!(request.device_id, 4);
        assert_eq!(request.frames_per_callback, 320);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: ConfigOptions =
            serde_json::from_str(r#"{ "periodLenMs": 10, "recordDeviceId": 3 }"#).unwrap();
        assert_eq!(options.period_len_ms, 10);
        assert_eq!(options.record_device_id, 3);
        assert_eq!(options.sample_rate, 16000);
        assert!(options.channel_conversion_allowed);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let options = ConfigOptions::load_from_file("/nonexistent/live_effect.json");
        assert_eq!(options, ConfigOptions::default());
    }
}
