// Public API for host bridge integration
// This module provides the entry points a host application (JNI bridge, CLI)
// calls to drive the live effect engine.

use std::sync::Arc;

use crate::audio::{PeriodObserver, PeriodTap, PeriodTapReader};
use crate::config::ConfigOptions;
use crate::engine::{DuplexEngine, EngineNotice, StreamState};
use crate::error::{log_audio_error, StatusCode};
use crate::hal::{default_host, AudioApi, AudioHost, Direction};

// Re-export error code constants for host exposure
pub use crate::error::{AudioErrorCodes, ConfigErrorCodes};

/// Handle to one live effect engine.
///
/// Created explicitly by the host and released explicitly; every entry point
/// goes through the handle instead of process-global state. Dropping the
/// handle tears the streams down as well.
pub struct EngineHandle {
    engine: DuplexEngine,
}

impl EngineHandle {
    /// Engine on the platform's default audio host.
    pub fn create() -> Self {
        Self::with_host(default_host())
    }

    pub fn with_host(host: Arc<dyn AudioHost>) -> Self {
        Self {
            engine: DuplexEngine::new(host),
        }
    }

    /// Wrap an engine built with [`DuplexEngine::builder`].
    pub fn from_engine(engine: DuplexEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DuplexEngine {
        &self.engine
    }

    /// Validate and store stream parameters for the next open
    ///
    /// # Returns
    /// * `StatusCode::Ok` - parameters stored
    /// * `StatusCode::ErrorOutOfRange` - a value is outside its range
    /// * `StatusCode::ErrorBase` - a policy-fixed field was changed, or
    ///   streams are open
    pub fn setup_parameters(&self, options: &ConfigOptions) -> StatusCode {
        StatusCode::from_result(&self.engine.configure(options))
    }

    /// Open and start both streams. Already running is `Ok`.
    pub fn start_audio(&self) -> StatusCode {
        let result = self.engine.switch_effect(true);
        if let Err(err) = &result {
            log_audio_error(err, "start_audio");
        }
        StatusCode::from_result(&result)
    }

    /// Stop and close both streams. Already stopped is `Ok`.
    pub fn stop_audio(&self) -> StatusCode {
        let result = self.engine.switch_effect(false);
        if let Err(err) = &result {
            log_audio_error(err, "stop_audio");
        }
        StatusCode::from_result(&result)
    }

    pub fn set_effect_on(&self, on: bool) -> bool {
        self.engine.set_effect_on(on)
    }

    pub fn is_effect_on(&self) -> bool {
        self.engine.is_effect_on()
    }

    pub fn set_recording_device_id(&self, device_id: i32) -> StatusCode {
        StatusCode::from_result(&self.engine.set_recording_device_id(device_id))
    }

    pub fn set_playback_device_id(&self, device_id: i32) -> StatusCode {
        StatusCode::from_result(&self.engine.set_playback_device_id(device_id))
    }

    /// Select the audio API; false while the effect is on.
    pub fn set_api(&self, api: AudioApi) -> bool {
        self.engine.set_audio_api(api)
    }

    pub fn is_aaudio_recommended(&self) -> bool {
        self.engine.is_aaudio_recommended()
    }

    /// Install a per-period observer. Applies on the next open.
    pub fn set_observer(&self, observer: Option<Arc<dyn PeriodObserver>>) {
        self.engine.set_observer(observer);
    }

    /// Install a [`PeriodTap`] sized for the configured period and return
    /// its reader. Replaces any previous observer; applies on the next open.
    ///
    /// A `frame_count` of 0 is raised to 1.
    pub fn attach_tap(&self, frame_count: usize) -> PeriodTapReader {
        let period_samples = self.engine.config().layout().period_samples();
        let (tap, reader) = PeriodTap::new(period_samples, frame_count.max(1));
        self.engine.set_observer(Some(tap));
        reader
    }

    pub fn stream_state(&self, direction: Direction) -> StreamState {
        self.engine.stream_state(direction)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineNotice> {
        self.engine.subscribe()
    }

    /// Turn the effect off and destroy the engine.
    pub fn release(self) -> StatusCode {
        let status = self.stop_audio();
        log::info!("[EngineHandle] Released (status {:?})", status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{CallbackResult, HalError, SimulatedHost};

    fn handle() -> (EngineHandle, SimulatedHost) {
        let host = SimulatedHost::new();
        let engine = DuplexEngine::builder(Arc::new(host.clone()))
            .manual_recovery()
            .build();
        (EngineHandle::from_engine(engine), host)
    }

    #[test]
    fn test_setup_parameters_status_codes() {
        let (handle, _host) = handle();
        assert_eq!(handle.setup_parameters(&ConfigOptions::default()), StatusCode::Ok);

        let options = ConfigOptions {
            channel_count: 300,
            ..ConfigOptions::default()
        };
        assert_eq!(handle.setup_parameters(&options), StatusCode::ErrorOutOfRange);

        let options = ConfigOptions {
            sharing_mode: 0,
            ..ConfigOptions::default()
        };
        assert_eq!(handle.setup_parameters(&options), StatusCode::ErrorBase);
    }

    #[test]
    fn test_start_and_stop_audio() {
        let (handle, _host) = handle();
        assert_eq!(handle.start_audio(), StatusCode::Ok);
        assert!(handle.is_effect_on());
        assert_eq!(handle.stream_state(Direction::Input), StreamState::Running);
        assert_eq!(handle.stream_state(Direction::Output), StreamState::Running);

        assert_eq!(handle.start_audio(), StatusCode::Ok);

        assert_eq!(handle.stop_audio(), StatusCode::Ok);
        assert!(!handle.is_effect_on());
        assert_eq!(handle.stream_state(Direction::Input), StreamState::Closed);
        assert_eq!(handle.stream_state(Direction::Output), StreamState::Closed);
    }

    #[test]
    fn test_start_audio_failure_leaves_engine_closed() {
        let (handle, host) = handle();
        host.fail_next_open(Direction::Output, HalError::Unavailable);
        assert_eq!(handle.start_audio(), StatusCode::ErrorBase);
        assert!(!handle.is_effect_on());
        assert_eq!(host.live_streams(Direction::Input), 0);
        assert_eq!(host.live_streams(Direction::Output), 0);
    }

    #[test]
    fn test_device_id_status() {
        let (handle, _host) = handle();
        assert_eq!(handle.set_recording_device_id(3), StatusCode::Ok);
        assert_eq!(handle.set_playback_device_id(-4), StatusCode::ErrorOutOfRange);
        assert_eq!(handle.engine().config().record_device_id, 3);
    }

    #[test]
    fn test_release_closes_streams() {
        let (handle, host) = handle();
        assert!(handle.set_effect_on(true));
        assert_eq!(handle.release(), StatusCode::Ok);
        assert_eq!(host.live_streams(Direction::Input), 0);
        assert_eq!(host.live_streams(Direction::Output), 0);
    }

    #[test]
    fn test_attach_tap_sees_periods() {
        let (handle, host) = handle();
        let mut reader = handle.attach_tap(8);
        assert_eq!(handle.start_audio(), StatusCode::Ok);

        assert_eq!(
            host.pump_input(&vec![7_i16; 320]),
            Some(CallbackResult::Continue)
        );
        let mut seen = 0;
        reader.drain(Direction::Input, |frame| {
            assert_eq!(frame.samples.len(), 320);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_attach_tap_with_zero_frames_holds_one() {
        let (handle, host) = handle();
        let mut reader = handle.attach_tap(0);
        assert_eq!(handle.start_audio(), StatusCode::Ok);

        host.pump_input(&vec![1_i16; 320]);
        host.pump_input(&vec![2_i16; 320]);
        let mut seen = Vec::new();
        reader.drain(Direction::Input, |frame| seen.push(frame.samples[0]));
        assert_eq!(seen, vec![1]);
    }
}
