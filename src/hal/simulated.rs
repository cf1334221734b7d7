//! Deterministic in-process audio host.
//!
//! `SimulatedHost` never touches a device. Callbacks are driven explicitly
//! with [`SimulatedHost::pump_input`] / [`SimulatedHost::pump_output`], every
//! open/start/stop/close is recorded in call order, faults can be injected
//! per direction, and hardware disconnects can be fired on demand. It backs
//! the engine's tests and the CLI `simulate` command.
//!
//! Cloning the host shares its state, so a test can keep one clone while the
//! engine owns another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    AudioHost, CallbackResult, Direction, ErrorCallback, HalError, HardwareStream, InputCallback,
    OutputCallback, PerformanceMode, StreamProperties, StreamRequest,
};

/// Operation recorded by the simulated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    Open,
    Start,
    Stop,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCall {
    pub direction: Direction,
    pub op: HostOp,
}

enum SimCallback {
    Input(Box<dyn InputCallback>),
    Output(Box<dyn OutputCallback>),
}

struct SimEntry {
    id: u64,
    properties: StreamProperties,
    /// Taken out while a pump runs the callback outside the state lock.
    callback: Option<SimCallback>,
    errors: Arc<dyn ErrorCallback>,
    running: bool,
}

#[derive(Default, Clone, Copy)]
struct Overrides {
    sample_rate: Option<u32>,
    buffer_capacity_frames: Option<u32>,
    performance_mode: Option<PerformanceMode>,
}

#[derive(Default)]
struct Faults {
    open: Option<HalError>,
    start: Option<HalError>,
    stop: Option<HalError>,
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    streams: Vec<SimEntry>,
    calls: Vec<HostCall>,
    requests: Vec<StreamRequest>,
    faults: [Faults; 2],
    overrides: [Overrides; 2],
    aaudio_recommended: bool,
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Input => 0,
        Direction::Output => 1,
    }
}

impl SimState {
    fn entry_mut(&mut self, id: u64) -> Option<&mut SimEntry> {
        self.streams.iter_mut().find(|entry| entry.id == id)
    }

    /// Newest running stream of `direction`.
    fn running_index(&self, direction: Direction) -> Option<usize> {
        self.streams
            .iter()
            .rposition(|entry| entry.properties.direction == direction && entry.running)
    }
}

#[derive(Clone, Default)]
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make the next open of `direction` fail with `error`.
    pub fn fail_next_open(&self, direction: Direction, error: HalError) {
        self.lock().faults[slot(direction)].open = Some(error);
    }

    /// Make the next start of `direction` fail with `error`.
    pub fn fail_next_start(&self, direction: Direction, error: HalError) {
        self.lock().faults[slot(direction)].start = Some(error);
    }

    /// Make the next stop of `direction` fail with `error`.
    pub fn fail_next_stop(&self, direction: Direction, error: HalError) {
        self.lock().faults[slot(direction)].stop = Some(error);
    }

    /// Negotiate `rate` instead of the requested sample rate.
    pub fn set_negotiated_sample_rate(&self, direction: Direction, rate: Option<u32>) {
        self.lock().overrides[slot(direction)].sample_rate = rate;
    }

    /// Report `frames` as buffer capacity instead of four periods.
    pub fn set_buffer_capacity_frames(&self, direction: Direction, frames: Option<u32>) {
        self.lock().overrides[slot(direction)].buffer_capacity_frames = frames;
    }

    /// Negotiate `mode` instead of the requested performance mode.
    pub fn set_performance_mode(&self, direction: Direction, mode: Option<PerformanceMode>) {
        self.lock().overrides[slot(direction)].performance_mode = mode;
    }

    pub fn set_aaudio_recommended(&self, recommended: bool) {
        self.lock().aaudio_recommended = recommended;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every open/start/stop/close in call order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Requests passed to every open, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.lock().requests.clone()
    }

    /// Most recent open request of `direction`.
    pub fn last_request(&self, direction: Direction) -> Option<StreamRequest> {
        self.lock()
            .requests
            .iter()
            .rev()
            .find(|request| request.direction == direction)
            .cloned()
    }

    /// Stream handles of `direction` opened and not yet closed or disconnected.
    pub fn live_streams(&self, direction: Direction) -> usize {
        self.lock()
            .streams
            .iter()
            .filter(|entry| entry.properties.direction == direction)
            .count()
    }

    pub fn is_running(&self, direction: Direction) -> bool {
        self.lock().running_index(direction).is_some()
    }

    // ------------------------------------------------------------------
    // Hardware drivers
    // ------------------------------------------------------------------

    /// Deliver one captured period to the running input stream.
    ///
    /// Returns `None` when no input stream is running. A `Stop` result
    /// halts the stream, like a real driver would.
    pub fn pump_input(&self, frames: &[i16]) -> Option<CallbackResult> {
        let (id, properties, mut callback) = self.take_callback(Direction::Input)?;
        let result = match &mut callback {
            SimCallback::Input(cb) => cb.on_audio_ready(&properties, frames),
            SimCallback::Output(_) => CallbackResult::Stop,
        };
        self.restore_callback(id, callback, result);
        Some(result)
    }

    /// Ask the running output stream to fill `frames`.
    pub fn pump_output(&self, frames: &mut [i16]) -> Option<CallbackResult> {
        let (id, properties, mut callback) = self.take_callback(Direction::Output)?;
        let result = match &mut callback {
            SimCallback::Output(cb) => cb.on_audio_ready(&properties, frames),
            SimCallback::Input(_) => CallbackResult::Stop,
        };
        self.restore_callback(id, callback, result);
        Some(result)
    }

    /// Simulate the hardware closing a stream on its own (headset unplug).
    ///
    /// Fires before-close then after-close on the stream's error callback,
    /// outside the host lock. Returns false if no stream of `direction` is open.
    pub fn disconnect(&self, direction: Direction, error: HalError) -> bool {
        let removed = {
            let mut state = self.lock();
            let index = state
                .streams
                .iter()
                .rposition(|entry| entry.properties.direction == direction);
            index.map(|index| state.streams.remove(index))
        };

        match removed {
            Some(entry) => {
                entry.errors.on_error_before_close(&entry.properties, &error);
                entry.errors.on_error_after_close(&entry.properties, &error);
                true
            }
            None => false,
        }
    }

    fn take_callback(&self, direction: Direction) -> Option<(u64, StreamProperties, SimCallback)> {
        let mut state = self.lock();
        let index = state.running_index(direction)?;
        let entry = &mut state.streams[index];
        let callback = entry.callback.take()?;
        Some((entry.id, entry.properties, callback))
    }

    fn restore_callback(&self, id: u64, callback: SimCallback, result: CallbackResult) {
        let mut state = self.lock();
        if let Some(entry) = state.entry_mut(id) {
            entry.callback = Some(callback);
            if result == CallbackResult::Stop {
                entry.running = false;
            }
        }
    }

    fn open(
        &self,
        request: &StreamRequest,
        callback: SimCallback,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        let mut state = self.lock();
        let direction = request.direction;
        state.calls.push(HostCall {
            direction,
            op: HostOp::Open,
        });
        state.requests.push(request.clone());
        if let Some(error) = state.faults[slot(direction)].open.take() {
            return Err(error);
        }

        let overrides = state.overrides[slot(direction)];
        let properties = StreamProperties {
            direction,
            sample_rate: overrides.sample_rate.unwrap_or(request.sample_rate),
            channel_count: request.channel_count,
            buffer_capacity_frames: overrides
                .buffer_capacity_frames
                .unwrap_or(request.frames_per_callback * 4),
            frames_per_callback: request.frames_per_callback,
            performance_mode: overrides
                .performance_mode
                .unwrap_or(request.performance_mode),
        };

        state.next_id += 1;
        let id = state.next_id;
        state.streams.push(SimEntry {
            id,
            properties,
            callback: Some(callback),
            errors,
            running: false,
        });

        Ok(Box::new(SimStream {
            id,
            properties,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

impl AudioHost for SimulatedHost {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        callback: Box<dyn InputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        self.open(request, SimCallback::Input(callback), errors)
    }

    fn open_output(
        &self,
        request: &StreamRequest,
        callback: Box<dyn OutputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        self.open(request, SimCallback::Output(callback), errors)
    }

    fn is_aaudio_recommended(&self) -> bool {
        self.lock().aaudio_recommended
    }
}

struct SimStream {
    id: u64,
    properties: StreamProperties,
    state: Arc<Mutex<SimState>>,
    closed: bool,
}

impl SimStream {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, state: &mut SimState, op: HostOp) {
        state.calls.push(HostCall {
            direction: self.properties.direction,
            op,
        });
    }
}

impl HardwareStream for SimStream {
    fn properties(&self) -> StreamProperties {
        self.properties
    }

    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HalError> {
        if self.closed {
            return Err(HalError::Closed);
        }
        Ok(frames.min(self.properties.buffer_capacity_frames))
    }

    fn request_start(&mut self) -> Result<(), HalError> {
        let direction = self.properties.direction;
        let mut state = self.lock();
        self.record(&mut state, HostOp::Start);
        if self.closed {
            return Err(HalError::Closed);
        }
        if let Some(error) = state.faults[slot(direction)].start.take() {
            return Err(error);
        }
        match state.entry_mut(self.id) {
            Some(entry) => {
                entry.running = true;
                Ok(())
            }
            None => Err(HalError::Disconnected),
        }
    }

    fn request_stop(&mut self) -> Result<(), HalError> {
        let direction = self.properties.direction;
        let mut state = self.lock();
        self.record(&mut state, HostOp::Stop);
        if self.closed {
            return Err(HalError::Closed);
        }
        if let Some(error) = state.faults[slot(direction)].stop.take() {
            return Err(error);
        }
        if let Some(entry) = state.entry_mut(self.id) {
            entry.running = false;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        if self.closed {
            return Err(HalError::Closed);
        }
        let mut state = self.lock();
        self.record(&mut state, HostOp::Close);
        state.streams.retain(|entry| entry.id != self.id);
        drop(state);
        self.closed = true;
        Ok(())
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.lock();
            state.streams.retain(|entry| entry.id != self.id);
        }
    }
}
