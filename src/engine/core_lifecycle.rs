use std::sync::Arc;

use crate::audio::{
    FrameBufferChannel, InputCallbackHandler, OutputCallbackHandler, PeriodObserver,
    StreamErrorHandler,
};
use crate::config::{EngineConfig, PeriodLayout};
use crate::engine::link::EngineEvent;
use crate::engine::notice::NoticeKind;
use crate::engine::recovery::summarize;
use crate::engine::state::StreamState;
use crate::error::{log_audio_error, AudioError, ConfigError, ErrorCode};
use crate::hal::{AudioApi, Direction, ErrorCallback, PerformanceMode, StreamProperties};

use super::{EngineCore, StreamSlot};

/// Keep the first error of a best-effort sequence, log the rest.
fn keep_first(first: &mut Option<AudioError>, result: Result<(), AudioError>, context: &str) {
    if let Err(err) = result {
        log_audio_error(&err, context);
        first.get_or_insert(err);
    }
}

impl EngineCore {
    fn slot(&self, direction: Direction) -> &StreamSlot {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut StreamSlot {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    fn streams_open(&self) -> bool {
        self.input.stream.is_some() || self.output.stream.is_some()
    }

    pub(crate) fn stream_properties(&self, direction: Direction) -> Option<StreamProperties> {
        self.slot(direction)
            .stream
            .as_ref()
            .map(|stream| stream.properties())
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    pub(crate) fn configure(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        if self.streams_open() {
            return Err(ConfigError::StreamsActive);
        }
        log::info!(
            "[DuplexEngine] Configured: {} Hz, {} ch, {} ms period ({} frames), api {:?}",
            config.sample_rate,
            config.channel_count,
            config.period_ms,
            config.layout().frames_per_period,
            config.audio_api
        );
        self.config = config;
        Ok(())
    }

    pub(crate) fn set_audio_api(&mut self, api: AudioApi) -> bool {
        if self.effect_on || self.streams_open() {
            log::warn!("[DuplexEngine] Cannot change audio API while streams are active");
            return false;
        }
        self.config.audio_api = api;
        true
    }

    pub(crate) fn set_device_id(
        &mut self,
        direction: Direction,
        device_id: i32,
    ) -> Result<(), ConfigError> {
        let field = match direction {
            Direction::Input => "recordDeviceId",
            Direction::Output => "playbackDeviceId",
        };
        if device_id < 0 {
            return Err(ConfigError::OutOfRange {
                field,
                value: device_id as i64,
            });
        }
        match direction {
            Direction::Input => self.config.record_device_id = device_id,
            Direction::Output => self.config.playback_device_id = device_id,
        }
        Ok(())
    }

    pub(crate) fn set_observer(&mut self, observer: Option<Arc<dyn PeriodObserver>>) {
        if self.streams_open() {
            log::info!("[DuplexEngine] Observer change applies on next open");
        }
        self.observer = observer;
    }

    // ========================================================================
    // OPEN / CLOSE
    // ========================================================================

    pub(crate) fn open_streams(&mut self) -> Result<(), AudioError> {
        self.open_pair()?;
        let sample_rate = self
            .stream_properties(Direction::Input)
            .map(|props| props.sample_rate)
            .unwrap_or(self.config.sample_rate);
        self.notices.publish(
            NoticeKind::StreamsOpened {
                sample_rate,
                frames_per_period: self.config.layout().frames_per_period,
            },
            None,
        );
        Ok(())
    }

    fn open_pair(&mut self) -> Result<(), AudioError> {
        if self.streams_open() {
            return Err(AudioError::AlreadyOpen);
        }

        let layout = self.config.layout();
        self.channel = Some(Arc::new(FrameBufferChannel::new(layout.period_samples())));
        self.link.attach(self.event_tx.clone());

        if let Err(err) = self.open_direction(Direction::Input, self.config.sample_rate) {
            self.link.detach();
            self.channel = None;
            return Err(err);
        }

        let input_rate = self
            .stream_properties(Direction::Input)
            .map(|props| props.sample_rate)
            .unwrap_or(self.config.sample_rate);
        if let Err(err) = self.open_direction(Direction::Output, input_rate) {
            // Never leave a half-open engine behind.
            self.link.detach();
            keep_first(
                &mut None,
                self.close_direction(Direction::Input),
                "open_streams rollback",
            );
            self.channel = None;
            return Err(err);
        }
        Ok(())
    }

    fn open_direction(&mut self, direction: Direction, sample_rate: u32) -> Result<(), AudioError> {
        let layout = self.config.layout();
        let channel = self.channel.clone().ok_or(AudioError::NotOpen)?;
        let status = Arc::clone(&self.slot(direction).status);
        status.transition(StreamState::Opening)?;

        let errors: Arc<dyn ErrorCallback> = Arc::new(StreamErrorHandler::new(
            Arc::clone(&status),
            self.link.clone(),
        ));
        let opened = match direction {
            Direction::Input => {
                let handler = InputCallbackHandler::new(
                    channel,
                    layout,
                    Arc::clone(&status),
                    self.observer.clone(),
                    self.link.clone(),
                );
                self.host
                    .open_input(&self.config.input_request(), Box::new(handler), errors)
            }
            Direction::Output => {
                let handler = OutputCallbackHandler::new(
                    channel,
                    layout,
                    Arc::clone(&status),
                    self.observer.clone(),
                    self.link.clone(),
                );
                self.host.open_output(
                    &self.config.output_request(sample_rate),
                    Box::new(handler),
                    errors,
                )
            }
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(source) => {
                let _ = status.transition(StreamState::Closed);
                let err = AudioError::StreamOpenFailed { direction, source };
                log_audio_error(&err, "open_streams");
                return Err(err);
            }
        };

        let props = stream.properties();
        if let Err(err) = Self::check_negotiated(&layout, sample_rate, &props) {
            log_audio_error(&err, "open_streams");
            if let Err(close_err) = stream.close() {
                log::warn!(
                    "[DuplexEngine] Closing rejected {} stream failed: {}",
                    direction,
                    close_err
                );
            }
            let _ = status.transition(StreamState::Closed);
            return Err(err);
        }

        match stream.set_buffer_size_frames(layout.low_latency_buffer_frames()) {
            Ok(applied) => log::info!(
                "[DuplexEngine] {} buffer size set to {} frames (requested {})",
                direction,
                applied,
                layout.low_latency_buffer_frames()
            ),
            Err(err) => log::warn!(
                "[DuplexEngine] Could not set {} buffer size: {}",
                direction,
                err
            ),
        }
        self.warn_if_not_low_latency(&props);

        status.transition(StreamState::Open)?;
        self.slot_mut(direction).stream = Some(stream);
        log::info!(
            "[DuplexEngine] Opened {} stream: {} Hz, {} ch, capacity {} frames, {} frames/callback",
            direction,
            props.sample_rate,
            props.channel_count,
            props.buffer_capacity_frames,
            props.frames_per_callback
        );
        Ok(())
    }

    /// Negotiated values must keep `bufferSizeBytes` intact.
    fn check_negotiated(
        layout: &PeriodLayout,
        requested_rate: u32,
        props: &StreamProperties,
    ) -> Result<(), AudioError> {
        if props.sample_rate != requested_rate {
            return Err(AudioError::SampleRateMismatch {
                direction: props.direction,
                requested: requested_rate,
                negotiated: props.sample_rate,
            });
        }
        if props.channel_count != layout.channel_count {
            return Err(AudioError::ChannelCountMismatch {
                direction: props.direction,
                requested: layout.channel_count,
                negotiated: props.channel_count,
            });
        }
        let capacity_bytes = layout.capacity_bytes(props.buffer_capacity_frames);
        if capacity_bytes < layout.period_bytes() {
            return Err(AudioError::BufferCapacityTooSmall {
                direction: props.direction,
                required_bytes: layout.period_bytes(),
                capacity_bytes,
            });
        }
        Ok(())
    }

    fn warn_if_not_low_latency(&self, props: &StreamProperties) {
        if props.performance_mode != PerformanceMode::LowLatency {
            let detail = format!(
                "{} stream is not low latency ({:?}). Check the requested format, sample rate and channel count.",
                props.direction, props.performance_mode
            );
            log::warn!("[DuplexEngine] {}", detail);
            self.notices.publish(NoticeKind::Warning, Some(detail));
        }
    }

    /// Close one direction and drive its state to `Closed`.
    fn close_direction(&mut self, direction: Direction) -> Result<(), AudioError> {
        let status = Arc::clone(&self.slot(direction).status);
        let Some(mut stream) = self.slot_mut(direction).stream.take() else {
            status.settle_closed();
            return Ok(());
        };

        let result = stream.close();
        drop(stream);
        status.settle_closed();
        result.map_err(|source| AudioError::StreamCloseFailed { direction, source })
    }

    /// Stop output, stop input, detach link, close output, close input.
    fn teardown(&mut self) -> Result<(), AudioError> {
        let mut first = self.stop_all().err();
        self.link.detach();
        let result = self.close_direction(Direction::Output);
        keep_first(&mut first, result, "close_streams");
        let result = self.close_direction(Direction::Input);
        keep_first(&mut first, result, "close_streams");
        self.channel = None;
        self.started = false;
        first.map_or(Ok(()), Err)
    }

    pub(crate) fn close_streams(&mut self) -> Result<(), AudioError> {
        let was_open = self.streams_open();
        let result = self.teardown();
        if was_open {
            self.notices.publish(NoticeKind::StreamsClosed, None);
            log::info!("[DuplexEngine] Streams closed");
        }
        result
    }

    // ========================================================================
    // START / STOP
    // ========================================================================

    fn start_direction(&mut self, direction: Direction) -> Result<(), AudioError> {
        let status = Arc::clone(&self.slot(direction).status);
        let stream = self
            .slot_mut(direction)
            .stream
            .as_mut()
            .ok_or(AudioError::NotOpen)?;

        let from = status.get();
        if !from.can_transition_to(StreamState::Running) {
            return Err(AudioError::InvalidTransition {
                direction,
                from,
                to: StreamState::Running,
            });
        }
        stream
            .request_start()
            .map_err(|source| AudioError::StreamStartFailed { direction, source })?;
        status.transition(StreamState::Running)?;
        Ok(())
    }

    fn stop_direction(&mut self, direction: Direction) -> Result<(), AudioError> {
        let status = Arc::clone(&self.slot(direction).status);
        if status.get() != StreamState::Running {
            return Ok(());
        }
        let Some(stream) = self.slot_mut(direction).stream.as_mut() else {
            return Ok(());
        };

        status.transition(StreamState::Stopping)?;
        match stream.request_stop() {
            Ok(()) => {
                status.transition(StreamState::Open)?;
                Ok(())
            }
            Err(source) => {
                status.force_error();
                Err(AudioError::StreamStopFailed { direction, source })
            }
        }
    }

    /// Best effort: output first, then input.
    fn stop_all(&mut self) -> Result<(), AudioError> {
        let mut first = None;
        let result = self.stop_direction(Direction::Output);
        keep_first(&mut first, result, "stop");
        let result = self.stop_direction(Direction::Input);
        keep_first(&mut first, result, "stop");
        self.started = false;
        first.map_or(Ok(()), Err)
    }

    fn start_pair(&mut self) -> Result<(), AudioError> {
        if self.input.stream.is_none() || self.output.stream.is_none() {
            return Err(AudioError::NotOpen);
        }
        self.start_direction(Direction::Input)?;
        if let Err(err) = self.start_direction(Direction::Output) {
            log::warn!(
                "[DuplexEngine] Output failed to start; input left running until stop() or close_streams()"
            );
            return Err(err);
        }
        self.started = true;
        Ok(())
    }

    pub(crate) fn start(&mut self) -> Result<(), AudioError> {
        self.start_pair().map_err(|err| {
            log_audio_error(&err, "start");
            err
        })?;
        self.notices.publish(NoticeKind::Started, None);
        log::info!("[DuplexEngine] Started");
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<(), AudioError> {
        let was_started = self.started;
        let result = self.stop_all();
        if was_started {
            self.notices.publish(NoticeKind::Stopped, None);
            log::info!("[DuplexEngine] Stopped");
        }
        result
    }

    pub(crate) fn switch_effect(&mut self, on: bool) -> Result<(), AudioError> {
        if on == self.effect_on {
            return Ok(());
        }

        if on {
            self.open_streams()?;
            if let Err(err) = self.start() {
                if let Err(close_err) = self.close_streams() {
                    log_audio_error(&close_err, "switch_effect rollback");
                }
                return Err(err);
            }
            self.effect_on = true;
            Ok(())
        } else {
            let stopped = self.stop();
            let closed = self.close_streams();
            self.effect_on = false;
            stopped.and(closed)
        }
    }

    /// Turning off always succeeds from the caller's point of view.
    pub(crate) fn set_effect_on(&mut self, on: bool) -> bool {
        match self.switch_effect(on) {
            Ok(()) => true,
            Err(err) => {
                log_audio_error(&err, "set_effect_on");
                !on
            }
        }
    }

    // ========================================================================
    // DEVICE CHANGE RECOVERY
    // ========================================================================

    pub(crate) fn handle_device_change(&mut self) -> Result<(), AudioError> {
        let input_affected = self.input.status.get() == StreamState::Error;
        let output_affected = self.output.status.get() == StreamState::Error;
        if !self.streams_open() || !(input_affected || output_affected) {
            return Ok(());
        }

        let restart = self.started;
        tracing::info!(
            input_affected,
            output_affected,
            restart,
            "handling device change"
        );

        let result = if input_affected {
            self.reopen_pair(restart)
        } else {
            self.reopen_output(restart)
        };

        match result {
            Ok(()) => {
                tracing::info!("device change recovered");
                self.notices.publish(NoticeKind::DeviceChangeRecovered, None);
                Ok(())
            }
            Err(err) => {
                log_audio_error(&err, "handle_device_change");
                if let Err(close_err) = self.teardown() {
                    log_audio_error(&close_err, "handle_device_change teardown");
                }
                self.effect_on = false;
                self.notices
                    .publish(NoticeKind::DeviceChangeFailed, Some(err.message()));
                Err(err)
            }
        }
    }

    /// Input lost: rebuild the whole pair, output rate follows the new input.
    fn reopen_pair(&mut self, restart: bool) -> Result<(), AudioError> {
        if let Err(err) = self.teardown() {
            tracing::debug!(error = %err, "teardown of lost streams reported an error");
        }
        self.open_pair()?;
        if restart {
            self.start_pair()?;
        }
        Ok(())
    }

    /// Output lost: reopen it alone while input keeps running.
    fn reopen_output(&mut self, restart: bool) -> Result<(), AudioError> {
        let input_rate = self
            .stream_properties(Direction::Input)
            .map(|props| props.sample_rate)
            .ok_or(AudioError::NotOpen)?;

        let result = self.stop_direction(Direction::Output);
        keep_first(&mut None, result, "reopen_output");
        if let Err(err) = self.close_direction(Direction::Output) {
            tracing::debug!(error = %err, "closing lost output reported an error");
        }

        self.open_direction(Direction::Output, input_rate)?;
        if restart {
            self.start_direction(Direction::Output)?;
        }
        Ok(())
    }

    /// Stop output then input and close the pair; the effect ends off.
    fn close_after_fault(&mut self) {
        if !self.streams_open() {
            return;
        }
        if let Err(err) = self.stop() {
            log_audio_error(&err, "callback fault stop");
        }
        if let Err(err) = self.close_streams() {
            log_audio_error(&err, "callback fault close");
        }
        self.effect_on = false;
    }

    /// Handle a batch of events posted by the callback handlers.
    pub(crate) fn apply_events(&mut self, batch: Vec<EngineEvent>) {
        let (faults, disconnected) = summarize(batch);
        let faulted = !faults.is_empty();

        for fault in faults {
            if let EngineEvent::CallbackFault {
                direction,
                expected_bytes,
                actual_bytes,
            } = fault
            {
                tracing::warn!(
                    %direction,
                    expected_bytes,
                    actual_bytes,
                    "callback fault, stream stopped"
                );
                self.notices.publish(
                    NoticeKind::CallbackFault { direction },
                    Some(format!(
                        "expected {} bytes per period, got {}",
                        expected_bytes, actual_bytes
                    )),
                );
            }
        }

        if faulted {
            // A faulted stream only leaves Error through close, and its peer
            // must not keep running alone.
            self.close_after_fault();
            return;
        }

        if disconnected {
            if let Err(err) = self.handle_device_change() {
                tracing::error!(code = err.code(), error = %err, "device change recovery failed");
            }
        }
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        if self.streams_open() {
            if let Err(err) = self.teardown() {
                log_audio_error(&err, "drop");
            }
        }
        self.link.detach();
    }
}
