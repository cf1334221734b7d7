use super::*;

use crate::engine::notice::NoticeKind;
use crate::error::{ConfigErrorCodes, ErrorCode, StatusCode};
use crate::hal::{CallbackResult, HalError, HostCall, HostOp, PerformanceMode, SimulatedHost};

fn manual_engine() -> (DuplexEngine, SimulatedHost) {
    let host = SimulatedHost::new();
    let engine = DuplexEngine::builder(Arc::new(host.clone()))
        .manual_recovery()
        .build();
    (engine, host)
}

fn call(direction: Direction, op: HostOp) -> HostCall {
    HostCall { direction, op }
}

fn notice_kinds(rx: &mut broadcast::Receiver<EngineNotice>) -> Vec<NoticeKind> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|notice| notice.kind)
        .collect()
}

fn both_states(engine: &DuplexEngine) -> (StreamState, StreamState) {
    (
        engine.stream_state(Direction::Input),
        engine.stream_state(Direction::Output),
    )
}

#[test]
fn test_open_is_input_first() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();

    assert_eq!(
        host.calls(),
        vec![
            call(Direction::Input, HostOp::Open),
            call(Direction::Output, HostOp::Open)
        ]
    );
    assert_eq!(both_states(&engine), (StreamState::Open, StreamState::Open));
    assert_eq!(
        host.last_request(Direction::Output).unwrap().sample_rate,
        16000
    );
    assert!(engine.channel_stats().is_some());
}

#[test]
fn test_open_twice_is_rejected() {
    let (engine, _host) = manual_engine();
    engine.open_streams().unwrap();
    assert_eq!(engine.open_streams(), Err(AudioError::AlreadyOpen));
}

#[test]
fn test_output_open_failure_closes_input() {
    let (engine, host) = manual_engine();
    host.fail_next_open(Direction::Output, HalError::Unavailable);

    let err = engine.open_streams().unwrap_err();
    assert_eq!(
        err,
        AudioError::StreamOpenFailed {
            direction: Direction::Output,
            source: HalError::Unavailable,
        }
    );
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
    assert_eq!(
        host.calls().last(),
        Some(&call(Direction::Input, HostOp::Close))
    );
    assert!(engine.channel_stats().is_none());

    // A clean retry works afterwards.
    engine.open_streams().unwrap();
}

#[test]
fn test_input_rate_change_is_fatal() {
    let (engine, host) = manual_engine();
    host.set_negotiated_sample_rate(Direction::Input, Some(48000));

    assert_eq!(
        engine.open_streams(),
        Err(AudioError::SampleRateMismatch {
            direction: Direction::Input,
            requested: 16000,
            negotiated: 48000,
        })
    );
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert!(!host
        .calls()
        .iter()
        .any(|c| c.direction == Direction::Output));
}

#[test]
fn test_output_rate_change_closes_pair() {
    let (engine, host) = manual_engine();
    host.set_negotiated_sample_rate(Direction::Output, Some(44100));

    assert!(matches!(
        engine.open_streams(),
        Err(AudioError::SampleRateMismatch {
            direction: Direction::Output,
            ..
        })
    ));
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
}

#[test]
fn test_capacity_must_hold_one_period() {
    let (engine, host) = manual_engine();
    host.set_buffer_capacity_frames(Direction::Output, Some(100));

    assert_eq!(
        engine.open_streams(),
        Err(AudioError::BufferCapacityTooSmall {
            direction: Direction::Output,
            required_bytes: 640,
            capacity_bytes: 200,
        })
    );
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
}

#[test]
fn test_start_requires_open_streams() {
    let (engine, _host) = manual_engine();
    assert_eq!(engine.start(), Err(AudioError::NotOpen));
}

#[test]
fn test_start_stop_close_ordering() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();
    engine.start().unwrap();
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );

    host.clear_calls();
    engine.close_streams().unwrap();
    assert_eq!(
        host.calls(),
        vec![
            call(Direction::Output, HostOp::Stop),
            call(Direction::Input, HostOp::Stop),
            call(Direction::Output, HostOp::Close),
            call(Direction::Input, HostOp::Close),
        ]
    );
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert!(engine.channel_stats().is_none());
}

#[test]
fn test_partial_start_is_not_rolled_back() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();
    host.fail_next_start(Direction::Output, HalError::InvalidState);

    assert!(matches!(
        engine.start(),
        Err(AudioError::StreamStartFailed {
            direction: Direction::Output,
            ..
        })
    ));
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Open)
    );

    engine.stop().unwrap();
    assert_eq!(both_states(&engine), (StreamState::Open, StreamState::Open));
    engine.close_streams().unwrap();
}

#[test]
fn test_stop_failure_does_not_abort_teardown() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();
    engine.start().unwrap();
    host.fail_next_stop(Direction::Output, HalError::Timeout);

    let err = engine.close_streams().unwrap_err();
    assert_eq!(
        err,
        AudioError::StreamStopFailed {
            direction: Direction::Output,
            source: HalError::Timeout,
        }
    );
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
}

#[test]
fn test_passthrough_round_trip() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();
    engine.start().unwrap();

    let mut played = vec![0_i16; 320];
    assert_eq!(
        host.pump_output(&mut played),
        Some(CallbackResult::Continue)
    );
    assert!(played.iter().all(|&s| s == 0));

    let captured: Vec<i16> = (0..320).map(|i| (i * 7) as i16).collect();
    host.pump_input(&captured);
    host.pump_output(&mut played);
    assert_eq!(played, captured);

    let stats = engine.channel_stats().unwrap();
    assert_eq!(stats.periods_written, 1);
    assert_eq!(stats.periods_read_fresh, 1);
    assert_eq!(stats.periods_silent, 1);
}

#[test]
fn test_effect_toggle_is_idempotent() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    assert!(engine.set_effect_on(true));

    let opens = host
        .calls()
        .iter()
        .filter(|c| c.op == HostOp::Open)
        .count();
    let starts = host
        .calls()
        .iter()
        .filter(|c| c.op == HostOp::Start)
        .count();
    assert_eq!(opens, 2);
    assert_eq!(starts, 2);
    assert!(engine.is_effect_on());

    assert!(engine.set_effect_on(false));
    assert!(engine.set_effect_on(false));
    let closes = host
        .calls()
        .iter()
        .filter(|c| c.op == HostOp::Close)
        .count();
    assert_eq!(closes, 2);
    assert!(!engine.is_effect_on());
}

#[test]
fn test_effect_on_failure_leaves_engine_off() {
    let (engine, host) = manual_engine();
    host.fail_next_start(Direction::Output, HalError::Unavailable);

    assert!(!engine.set_effect_on(true));
    assert!(!engine.is_effect_on());
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert_eq!(host.live_streams(Direction::Input), 0);

    host.fail_next_open(Direction::Input, HalError::Unavailable);
    assert!(!engine.set_effect_on(true));
    assert!(engine.set_effect_on(true));
}

#[test]
fn test_invalid_config_leaves_streams_untouched() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    let calls_before = host.calls().len();

    let options = ConfigOptions {
        channel_count: 300,
        ..ConfigOptions::default()
    };
    let err = engine.configure(&options).unwrap_err();
    assert_eq!(err.code(), ConfigErrorCodes::OUT_OF_RANGE);
    assert_eq!(err.status(), StatusCode::ErrorOutOfRange);

    assert_eq!(host.calls().len(), calls_before);
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );
    assert_eq!(engine.config().channel_count, 1);
}

#[test]
fn test_configure_while_open_is_refused() {
    let (engine, _host) = manual_engine();
    engine.open_streams().unwrap();
    assert_eq!(
        engine.configure(&ConfigOptions::default()),
        Err(ConfigError::StreamsActive)
    );

    engine.close_streams().unwrap();
    let options = ConfigOptions {
        period_len_ms: 10,
        ..ConfigOptions::default()
    };
    engine.configure(&options).unwrap();
    assert_eq!(engine.config().layout().frames_per_period, 160);
}

#[test]
fn test_configured_layout_reaches_streams() {
    let (engine, host) = manual_engine();
    let options = ConfigOptions {
        sample_rate: 48000,
        period_len_ms: 10,
        channel_count: 2,
        record_device_id: 3,
        playback_device_id: 5,
        ..ConfigOptions::default()
    };
    engine.configure(&options).unwrap();
    engine.open_streams().unwrap();
    engine.start().unwrap();

    let input = host.last_request(Direction::Input).unwrap();
    assert_eq!(input.device_id, 3);
    assert_eq!(input.channel_count, 2);
    assert_eq!(input.frames_per_callback, 480);
    assert_eq!(host.last_request(Direction::Output).unwrap().device_id, 5);

    let captured = vec![11_i16; 960];
    let mut played = vec![0_i16; 960];
    host.pump_input(&captured);
    host.pump_output(&mut played);
    assert_eq!(played, captured);
}

#[test]
fn test_audio_api_locked_while_effect_on() {
    let (engine, _host) = manual_engine();
    assert!(engine.set_effect_on(true));
    assert!(!engine.set_audio_api(AudioApi::OpenSLES));
    assert_eq!(engine.config().audio_api, AudioApi::AAudio);

    assert!(engine.set_effect_on(false));
    assert!(engine.set_audio_api(AudioApi::OpenSLES));
    assert_eq!(engine.config().audio_api, AudioApi::OpenSLES);
}

#[test]
fn test_device_ids_apply_on_next_open() {
    let (engine, host) = manual_engine();
    engine.set_recording_device_id(7).unwrap();
    engine.set_playback_device_id(9).unwrap();
    assert!(engine.set_recording_device_id(-1).is_err());

    engine.open_streams().unwrap();
    assert_eq!(host.last_request(Direction::Input).unwrap().device_id, 7);
    assert_eq!(host.last_request(Direction::Output).unwrap().device_id, 9);
}

#[test]
fn test_aaudio_recommendation_comes_from_host() {
    let (engine, host) = manual_engine();
    assert!(!engine.is_aaudio_recommended());
    host.set_aaudio_recommended(true);
    assert!(engine.is_aaudio_recommended());
}

#[test]
fn test_input_disconnect_reopens_pair() {
    let (engine, host) = manual_engine();
    let mut notices = engine.subscribe();
    assert!(engine.set_effect_on(true));
    host.clear_calls();

    assert!(host.disconnect(Direction::Input, HalError::Disconnected));
    assert_eq!(engine.stream_state(Direction::Input), StreamState::Error);
    assert_eq!(engine.process_pending_events(), 1);

    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );
    assert_eq!(
        host.calls(),
        vec![
            call(Direction::Output, HostOp::Stop),
            call(Direction::Output, HostOp::Close),
            call(Direction::Input, HostOp::Close),
            call(Direction::Input, HostOp::Open),
            call(Direction::Output, HostOp::Open),
            call(Direction::Input, HostOp::Start),
            call(Direction::Output, HostOp::Start),
        ]
    );
    assert_eq!(host.live_streams(Direction::Input), 1);
    assert_eq!(host.live_streams(Direction::Output), 1);
    assert!(notice_kinds(&mut notices).contains(&NoticeKind::DeviceChangeRecovered));
    assert!(engine.is_effect_on());
}

#[test]
fn test_output_disconnect_reopens_output_only() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    host.clear_calls();

    host.disconnect(Direction::Output, HalError::Disconnected);
    engine.process_pending_events();

    assert_eq!(
        host.calls(),
        vec![
            call(Direction::Output, HostOp::Close),
            call(Direction::Output, HostOp::Open),
            call(Direction::Output, HostOp::Start),
        ]
    );
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );

    // The channel survived, so pass-through continues.
    let captured = vec![4_i16; 320];
    let mut played = vec![0_i16; 320];
    host.pump_input(&captured);
    host.pump_output(&mut played);
    assert_eq!(played, captured);
}

#[test]
fn test_unplug_burst_recovers_once() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    host.clear_calls();

    host.disconnect(Direction::Output, HalError::Disconnected);
    host.disconnect(Direction::Input, HalError::Disconnected);
    assert_eq!(engine.process_pending_events(), 2);

    let opens = host
        .calls()
        .iter()
        .filter(|c| c.op == HostOp::Open)
        .count();
    assert_eq!(opens, 2);
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );
}

#[test]
fn test_failed_recovery_closes_everything() {
    let (engine, host) = manual_engine();
    let mut notices = engine.subscribe();
    assert!(engine.set_effect_on(true));

    host.disconnect(Direction::Input, HalError::Disconnected);
    host.fail_next_open(Direction::Output, HalError::Unavailable);
    engine.process_pending_events();

    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
    assert!(!engine.is_effect_on());
    assert!(notice_kinds(&mut notices).contains(&NoticeKind::DeviceChangeFailed));

    // The host can turn the effect back on.
    assert!(engine.set_effect_on(true));
}

#[test]
fn test_disconnect_while_opened_but_stopped_does_not_start() {
    let (engine, host) = manual_engine();
    engine.open_streams().unwrap();
    host.disconnect(Direction::Input, HalError::Disconnected);
    host.clear_calls();

    engine.handle_device_change().unwrap();
    assert_eq!(both_states(&engine), (StreamState::Open, StreamState::Open));
    assert!(!host.calls().iter().any(|c| c.op == HostOp::Start));
}

#[test]
fn test_device_change_without_error_is_noop() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    host.clear_calls();
    engine.handle_device_change().unwrap();
    assert!(host.calls().is_empty());
}

#[test]
fn test_callback_fault_closes_pair_and_notifies() {
    let (engine, host) = manual_engine();
    let mut notices = engine.subscribe();
    assert!(engine.set_effect_on(true));
    host.clear_calls();

    assert_eq!(host.pump_input(&[0_i16; 100]), Some(CallbackResult::Stop));
    assert_eq!(engine.stream_state(Direction::Input), StreamState::Error);
    assert!(!host.is_running(Direction::Input));

    assert_eq!(engine.process_pending_events(), 1);
    assert_eq!(
        both_states(&engine),
        (StreamState::Closed, StreamState::Closed)
    );
    assert!(!engine.is_effect_on());
    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
    assert_eq!(
        host.calls(),
        vec![
            call(Direction::Output, HostOp::Stop),
            call(Direction::Output, HostOp::Close),
            call(Direction::Input, HostOp::Close),
        ]
    );

    let kinds = notice_kinds(&mut notices);
    assert!(kinds.contains(&NoticeKind::CallbackFault {
        direction: Direction::Input
    }));
    assert!(kinds.contains(&NoticeKind::StreamsClosed));

    // Faults are not auto-reopened, but the host can turn the effect back on.
    assert!(engine.set_effect_on(true));
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );
}

#[test]
fn test_output_never_loops_stale_capture_after_input_fault() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));

    let captured = vec![1234_i16; 320];
    let mut played = vec![0_i16; 320];
    host.pump_input(&captured);
    host.pump_output(&mut played);
    assert_eq!(played, captured);

    assert_eq!(host.pump_input(&[1_i16; 100]), Some(CallbackResult::Stop));

    // Before the fault is handled, playback is already silent.
    assert_eq!(host.pump_output(&mut played), Some(CallbackResult::Continue));
    assert!(played.iter().all(|&s| s == 0));

    engine.process_pending_events();
    for _ in 0..100 {
        assert_eq!(host.pump_output(&mut played), None);
    }
    assert!(!host.is_running(Direction::Output));
    assert!(engine.channel_stats().is_none());
}

#[test]
fn test_lifecycle_notices() {
    let (engine, _host) = manual_engine();
    let mut notices = engine.subscribe();
    assert!(engine.set_effect_on(true));
    assert!(engine.set_effect_on(false));

    assert_eq!(
        notice_kinds(&mut notices),
        vec![
            NoticeKind::StreamsOpened {
                sample_rate: 16000,
                frames_per_period: 320
            },
            NoticeKind::Started,
            NoticeKind::Stopped,
            NoticeKind::StreamsClosed,
        ]
    );
}

#[test]
fn test_warns_when_not_low_latency() {
    let (engine, host) = manual_engine();
    let mut notices = engine.subscribe();
    host.set_performance_mode(Direction::Output, Some(PerformanceMode::None));
    engine.open_streams().unwrap();

    let warnings = notice_kinds(&mut notices)
        .into_iter()
        .filter(|kind| *kind == NoticeKind::Warning)
        .count();
    assert_eq!(warnings, 1);
}

#[test]
fn test_drop_releases_streams() {
    let (engine, host) = manual_engine();
    assert!(engine.set_effect_on(true));
    drop(engine);

    assert_eq!(host.live_streams(Direction::Input), 0);
    assert_eq!(host.live_streams(Direction::Output), 0);
    assert_eq!(
        host.calls().last(),
        Some(&call(Direction::Input, HostOp::Close))
    );
}

#[test]
fn test_worker_recovers_in_background() {
    let host = SimulatedHost::new();
    let engine = DuplexEngine::new(Arc::new(host.clone()));
    assert!(engine.set_effect_on(true));

    host.disconnect(Direction::Input, HalError::Disconnected);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while both_states(&engine) != (StreamState::Running, StreamState::Running)
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(
        both_states(&engine),
        (StreamState::Running, StreamState::Running)
    );
    assert_eq!(engine.process_pending_events(), 0);
}
