//! DuplexEngine: orchestration of the input/output stream pair.
//!
//! The engine owns both hardware streams, both callback handlers and the
//! Frame Buffer Channel between them. Control calls (configure, open, start,
//! stop, close) come from a non-real-time caller thread and are serialized
//! through one mutex around [`EngineCore`]. Stream states are kept in atomics
//! outside that mutex so they can be read while a recovery is in progress.
//!
//! Ordering rules enforced here:
//! - open input first; output uses the input's negotiated sample rate
//! - a failed output open closes the input before returning
//! - teardown is stop output, stop input, detach link, close output, close input

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::audio::{ChannelStats, FrameBufferChannel, PeriodObserver};
use crate::config::{ConfigOptions, EngineConfig};
use crate::error::{log_config_error, AudioError, ConfigError};
use crate::hal::{AudioApi, AudioHost, Direction, HardwareStream, StreamProperties};

use super::link::{EngineEvent, EngineLink};
use super::notice::{EngineNotice, NoticePublisher};
use super::recovery::spawn_recovery_worker;
use super::state::{StreamState, StreamStatus};

#[path = "core_lifecycle.rs"]
mod core_lifecycle;

#[cfg(test)]
mod tests;

const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// One direction's stream and its state cell.
pub(crate) struct StreamSlot {
    pub(crate) status: Arc<StreamStatus>,
    pub(crate) stream: Option<Box<dyn HardwareStream>>,
}

/// Mutable engine state, always accessed under the engine mutex.
pub(crate) struct EngineCore {
    host: Arc<dyn AudioHost>,
    config: EngineConfig,
    input: StreamSlot,
    output: StreamSlot,
    channel: Option<Arc<FrameBufferChannel>>,
    link: EngineLink,
    event_tx: UnboundedSender<EngineEvent>,
    observer: Option<Arc<dyn PeriodObserver>>,
    effect_on: bool,
    /// Whether the pair should be running; recovery restarts only if set.
    started: bool,
    notices: NoticePublisher,
}

/// How asynchronous hardware events are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// A background worker handles events as they arrive.
    Worker,
    /// Events queue up until [`DuplexEngine::process_pending_events`] is called.
    Manual,
}

pub struct DuplexEngineBuilder {
    host: Arc<dyn AudioHost>,
    config: EngineConfig,
    recovery: RecoveryMode,
    notice_capacity: usize,
}

impl DuplexEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn manual_recovery(mut self) -> Self {
        self.recovery = RecoveryMode::Manual;
        self
    }

    pub fn notice_capacity(mut self, capacity: usize) -> Self {
        self.notice_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> DuplexEngine {
        let notices = NoticePublisher::new(self.notice_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let input_status = Arc::new(StreamStatus::new(Direction::Input));
        let output_status = Arc::new(StreamStatus::new(Direction::Output));

        let core = Arc::new(Mutex::new(EngineCore {
            host: Arc::clone(&self.host),
            config: self.config,
            input: StreamSlot {
                status: Arc::clone(&input_status),
                stream: None,
            },
            output: StreamSlot {
                status: Arc::clone(&output_status),
                stream: None,
            },
            channel: None,
            link: EngineLink::new(),
            event_tx,
            observer: None,
            effect_on: false,
            started: false,
            notices: notices.clone(),
        }));

        let pending_events = match self.recovery {
            RecoveryMode::Manual => Some(Mutex::new(event_rx)),
            RecoveryMode::Worker => {
                if let Err(err) = spawn_recovery_worker(Arc::downgrade(&core), event_rx) {
                    log::error!(
                        "[DuplexEngine] Failed to spawn recovery worker: {}. Device changes will not be handled.",
                        err
                    );
                }
                None
            }
        };

        log::info!("[DuplexEngine] Created on host '{}'", self.host.name());

        DuplexEngine {
            core,
            host: self.host,
            input_status,
            output_status,
            notices,
            pending_events,
        }
    }
}

/// Full-duplex pass-through engine.
pub struct DuplexEngine {
    core: Arc<Mutex<EngineCore>>,
    host: Arc<dyn AudioHost>,
    input_status: Arc<StreamStatus>,
    output_status: Arc<StreamStatus>,
    notices: NoticePublisher,
    pending_events: Option<Mutex<UnboundedReceiver<EngineEvent>>>,
}

impl DuplexEngine {
    /// Engine with default configuration and a background recovery worker.
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self::builder(host).build()
    }

    pub fn builder(host: Arc<dyn AudioHost>) -> DuplexEngineBuilder {
        DuplexEngineBuilder {
            host,
            config: EngineConfig::default(),
            recovery: RecoveryMode::Worker,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
        }
    }

    /// Acquire the engine lock for lifecycle operations.
    ///
    /// # Errors
    /// `AudioError::LockPoisoned` if a previous holder panicked.
    fn lock_core(&self) -> Result<MutexGuard<'_, EngineCore>, AudioError> {
        self.core.lock().map_err(|_| AudioError::LockPoisoned {
            component: "DuplexEngine".to_string(),
        })
    }

    /// Acquire the engine lock for plain field updates, where a poisoned
    /// lock cannot have left anything half-written.
    fn lock_core_recovering(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Validate and store host options for the next open
    ///
    /// # Errors
    /// * Any `ConfigError` from validation, with nothing changed
    /// * `ConfigError::StreamsActive` - streams are open
    pub fn configure(&self, options: &ConfigOptions) -> Result<(), ConfigError> {
        let config = EngineConfig::resolve(options).map_err(|err| {
            log_config_error(&err, "configure");
            err
        })?;
        self.lock_core_recovering().configure(config)
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> EngineConfig {
        self.lock_core_recovering().config.clone()
    }

    /// Select the audio API. Refused (false) while the effect is on or
    /// streams are open.
    pub fn set_audio_api(&self, api: AudioApi) -> bool {
        self.lock_core_recovering().set_audio_api(api)
    }

    pub fn is_aaudio_recommended(&self) -> bool {
        self.host.is_aaudio_recommended()
    }

    /// Select the capture device (0 = default). Applies on the next open.
    pub fn set_recording_device_id(&self, device_id: i32) -> Result<(), ConfigError> {
        self.lock_core_recovering()
            .set_device_id(Direction::Input, device_id)
    }

    /// Select the playback device (0 = default). Applies on the next open.
    pub fn set_playback_device_id(&self, device_id: i32) -> Result<(), ConfigError> {
        self.lock_core_recovering()
            .set_device_id(Direction::Output, device_id)
    }

    /// Install the per-period host notification. Applies on the next open.
    pub fn set_observer(&self, observer: Option<Arc<dyn PeriodObserver>>) {
        self.lock_core_recovering().set_observer(observer);
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open input, then output at the input's negotiated rate.
    ///
    /// # Errors
    /// * `AudioError::AlreadyOpen` - streams are already open
    /// * `AudioError::StreamOpenFailed` - the host refused a stream
    /// * `AudioError::SampleRateMismatch` / `ChannelCountMismatch` /
    ///   `BufferCapacityTooSmall` - negotiation broke the period layout
    ///
    /// On any error no stream is left open.
    pub fn open_streams(&self) -> Result<(), AudioError> {
        self.lock_core()?.open_streams()
    }

    /// Start input, then output. Not rolled back on partial failure.
    pub fn start(&self) -> Result<(), AudioError> {
        self.lock_core()?.start()
    }

    /// Stop output, then input. Best effort; returns the first failure.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.lock_core()?.stop()
    }

    /// Stop and close both streams and free the Frame Buffer Channel.
    ///
    /// Always ends with both directions `Closed`; returns the first failure.
    pub fn close_streams(&self) -> Result<(), AudioError> {
        self.lock_core()?.close_streams()
    }

    /// Turn the pass-through on (open + start) or off (stop + close).
    ///
    /// Returns false if turning on failed; the engine is then left closed.
    pub fn set_effect_on(&self, on: bool) -> bool {
        match self.lock_core() {
            Ok(mut core) => core.set_effect_on(on),
            Err(err) => {
                crate::error::log_audio_error(&err, "set_effect_on");
                false
            }
        }
    }

    /// Like [`set_effect_on`](Self::set_effect_on) but reports the failure.
    ///
    /// Turning off always leaves both directions closed, even on error.
    pub fn switch_effect(&self, on: bool) -> Result<(), AudioError> {
        self.lock_core()?.switch_effect(on)
    }

    pub fn is_effect_on(&self) -> bool {
        self.lock_core_recovering().effect_on
    }

    /// Recover streams the hardware closed on its own.
    ///
    /// Directions in `Error` are reopened: the whole pair if the input is
    /// affected, the output alone otherwise. On failure both directions are
    /// closed and the effect is turned off.
    pub fn handle_device_change(&self) -> Result<(), AudioError> {
        self.lock_core()?.handle_device_change()
    }

    /// In manual recovery mode, handle every queued hardware event now.
    ///
    /// Returns the number of events processed (always 0 with a worker).
    pub fn process_pending_events(&self) -> usize {
        let Some(pending) = &self.pending_events else {
            return 0;
        };
        let batch: Vec<EngineEvent> = {
            let mut rx = pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        let processed = batch.len();
        if processed > 0 {
            self.lock_core_recovering().apply_events(batch);
        }
        processed
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Current state of one direction. Never blocks on the engine lock.
    pub fn stream_state(&self, direction: Direction) -> StreamState {
        match direction {
            Direction::Input => self.input_status.get(),
            Direction::Output => self.output_status.get(),
        }
    }

    /// Negotiated properties of an open stream.
    pub fn stream_properties(&self, direction: Direction) -> Option<StreamProperties> {
        self.lock_core_recovering().stream_properties(direction)
    }

    /// Frame Buffer Channel counters while streams are open.
    pub fn channel_stats(&self) -> Option<ChannelStats> {
        self.lock_core_recovering()
            .channel
            .as_ref()
            .map(|channel| channel.stats())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    pub fn host_name(&self) -> &'static str {
        self.host.name()
    }
}
