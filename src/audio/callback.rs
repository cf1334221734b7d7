//! Real-time callback handlers for the duplex pass-through
//!
//! [`InputCallbackHandler`] runs on the input stream's callback thread and
//! publishes each captured period into the [`FrameBufferChannel`].
//! [`OutputCallbackHandler`] runs on the output stream's callback thread and
//! copies the latest period into the playback buffer. [`StreamErrorHandler`]
//! receives the hardware's asynchronous error notifications for either
//! direction.
//!
//! # Real-Time Safety
//! On the happy path a handler performs:
//! - one atomic state load
//! - a length check against the configured [`PeriodLayout`]
//! - one fixed-size copy under the channel lock
//! - an optional observer call after the lock is released
//!
//! No allocation, logging, or blocking beyond that lock. A period of the
//! wrong size moves the stream to `Error`, posts an [`EngineEvent`] and
//! returns `Stop`; it never aborts the audio thread.
//!
//! ```text
//! hardware -> InputCallbackHandler -> FrameBufferChannel -> OutputCallbackHandler -> hardware
//!                    |                                              |
//!                    +-------------> PeriodObserver <---------------+
//! ```

use std::sync::Arc;

use crate::audio::frame_buffer::FrameBufferChannel;
use crate::config::PeriodLayout;
use crate::engine::{EngineEvent, EngineLink, StreamStatus};
use crate::error::{log_audio_error, AudioError};
use crate::hal::{
    CallbackResult, Direction, ErrorCallback, HalError, InputCallback, OutputCallback,
    StreamProperties,
};

/// Host notification fired once per completed period in each direction.
///
/// Called on the real-time threads, after the channel lock is released.
/// Implementations must not block or allocate.
pub trait PeriodObserver: Send + Sync {
    fn on_capture(&self, _frames: &[i16]) {}

    fn on_playback(&self, _frames: &[i16]) {}
}

/// State shared by both data handlers.
struct HandlerShared {
    direction: Direction,
    channel: Arc<FrameBufferChannel>,
    layout: PeriodLayout,
    status: Arc<StreamStatus>,
    observer: Option<Arc<dyn PeriodObserver>>,
    link: EngineLink,
}

impl HandlerShared {
    /// Check that the stream's own parameters and the delivered period both
    /// match `bufferSizeBytes`. Returns the offending byte count on mismatch.
    fn check_period(&self, stream: &StreamProperties, samples: usize) -> Result<(), usize> {
        let configured = self.layout.period_bytes();
        let expected = self
            .layout
            .expected_bytes(stream.sample_rate, stream.channel_count);
        if expected != configured {
            return Err(expected);
        }
        let actual = samples * std::mem::size_of::<i16>();
        if actual != configured {
            return Err(actual);
        }
        Ok(())
    }

    /// Fault path: stop streaming and report upward.
    fn fault(&self, actual_bytes: usize) -> CallbackResult {
        let expected_bytes = self.layout.period_bytes();
        self.status.force_error();
        if self.direction == Direction::Input {
            // Playback must not keep looping the last good capture.
            self.channel.reset();
        }
        log_audio_error(
            &AudioError::CallbackFault {
                direction: self.direction,
                expected_bytes,
                actual_bytes,
            },
            "on_audio_ready",
        );
        self.link.report(EngineEvent::CallbackFault {
            direction: self.direction,
            expected_bytes,
            actual_bytes,
        });
        CallbackResult::Stop
    }
}

/// Data callback of the input stream.
pub struct InputCallbackHandler {
    shared: HandlerShared,
}

impl InputCallbackHandler {
    pub fn new(
        channel: Arc<FrameBufferChannel>,
        layout: PeriodLayout,
        status: Arc<StreamStatus>,
        observer: Option<Arc<dyn PeriodObserver>>,
        link: EngineLink,
    ) -> Self {
        Self {
            shared: HandlerShared {
                direction: Direction::Input,
                channel,
                layout,
                status,
                observer,
                link,
            },
        }
    }
}

impl InputCallback for InputCallbackHandler {
    fn on_audio_ready(&mut self, stream: &StreamProperties, frames: &[i16]) -> CallbackResult {
        let shared = &self.shared;
        if shared.status.should_stop() {
            return CallbackResult::Stop;
        }
        if let Err(actual) = shared.check_period(stream, frames.len()) {
            return shared.fault(actual);
        }
        if let Err(mismatch) = shared.channel.publish(frames) {
            return shared.fault(mismatch.actual * std::mem::size_of::<i16>());
        }
        if let Some(observer) = &shared.observer {
            observer.on_capture(frames);
        }
        CallbackResult::Continue
    }
}

/// Data callback of the output stream.
pub struct OutputCallbackHandler {
    shared: HandlerShared,
}

impl OutputCallbackHandler {
    pub fn new(
        channel: Arc<FrameBufferChannel>,
        layout: PeriodLayout,
        status: Arc<StreamStatus>,
        observer: Option<Arc<dyn PeriodObserver>>,
        link: EngineLink,
    ) -> Self {
        Self {
            shared: HandlerShared {
                direction: Direction::Output,
                channel,
                layout,
                status,
                observer,
                link,
            },
        }
    }
}

impl OutputCallback for OutputCallbackHandler {
    fn on_audio_ready(&mut self, stream: &StreamProperties, frames: &mut [i16]) -> CallbackResult {
        let shared = &self.shared;
        if shared.status.should_stop() {
            frames.fill(0);
            return CallbackResult::Stop;
        }
        if let Err(actual) = shared.check_period(stream, frames.len()) {
            frames.fill(0);
            return shared.fault(actual);
        }
        if let Err(mismatch) = shared.channel.consume_into(frames) {
            frames.fill(0);
            return shared.fault(mismatch.actual * std::mem::size_of::<i16>());
        }
        if let Some(observer) = &shared.observer {
            observer.on_playback(frames);
        }
        CallbackResult::Continue
    }
}

/// Receives asynchronous error notifications of one stream.
///
/// These arrive on a hardware callback thread. The only actions taken are
/// logging, marking the stream as failed, and posting the event for the
/// recovery worker.
pub struct StreamErrorHandler {
    status: Arc<StreamStatus>,
    link: EngineLink,
}

impl StreamErrorHandler {
    pub fn new(status: Arc<StreamStatus>, link: EngineLink) -> Self {
        Self { status, link }
    }
}

impl ErrorCallback for StreamErrorHandler {
    fn on_error_before_close(&self, stream: &StreamProperties, error: &HalError) {
        log::warn!(
            "[StreamErrorHandler] {} stream about to close: {}",
            stream.direction,
            error
        );
    }

    fn on_error_after_close(&self, stream: &StreamProperties, error: &HalError) {
        log::warn!(
            "[StreamErrorHandler] {} stream closed by hardware: {}",
            stream.direction,
            error
        );
        self.status.force_error();
        let posted = self.link.report(EngineEvent::StreamDisconnected {
            direction: stream.direction,
            error: error.clone(),
        });
        if !posted {
            log::debug!(
                "[StreamErrorHandler] engine detached, dropping {} disconnect",
                stream.direction
            );
        }
    }
}
