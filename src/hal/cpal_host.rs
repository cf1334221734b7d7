//! CPAL-based audio host for desktop platforms (Linux, macOS, Windows)
//!
//! cpal delivers callbacks with whatever buffer size the backend picks, so
//! each stream runs a small framer that regroups samples into exact periods
//! before calling the engine's handler. A fixed buffer of one period is
//! requested when the device advertises support for it.
//!
//! Device ids: 0 is the system default, `n > 0` is the n-th device (1-based)
//! in cpal's input or output device list, as printed by [`CpalHost::list_devices`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use serde::Serialize;

use super::{
    AudioHost, CallbackResult, Direction, ErrorCallback, HalError, HardwareStream, InputCallback,
    OutputCallback, PerformanceMode, StreamProperties, StreamRequest,
};

/// Periods of buffering the framer adds on top of the device buffer.
const FRAMER_CAPACITY_PERIODS: u32 = 2;

/// One device as listed by [`CpalHost::list_devices`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: i32,
    pub direction: Direction,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Default)]
pub struct CpalHost {
    _unit: (),
}

impl CpalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// List input and output devices with the ids accepted by the engine.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, HalError> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        let inputs = host.input_devices().map_err(backend_error)?;
        for (index, device) in inputs.enumerate() {
            let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
            devices.push(DeviceInfo {
                id: index as i32 + 1,
                direction: Direction::Input,
                is_default: default_input.as_deref() == Some(name.as_str()),
                name,
            });
        }
        let outputs = host.output_devices().map_err(backend_error)?;
        for (index, device) in outputs.enumerate() {
            let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
            devices.push(DeviceInfo {
                id: index as i32 + 1,
                direction: Direction::Output,
                is_default: default_output.as_deref() == Some(name.as_str()),
                name,
            });
        }
        Ok(devices)
    }

    fn find_device(&self, direction: Direction, device_id: i32) -> Result<cpal::Device, HalError> {
        let host = cpal::default_host();
        if device_id == 0 {
            let device = match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            };
            return device.ok_or(HalError::Unavailable);
        }

        let index = (device_id - 1) as usize;
        let device = match direction {
            Direction::Input => host.input_devices().map_err(backend_error)?.nth(index),
            Direction::Output => host.output_devices().map_err(backend_error)?.nth(index),
        };
        device.ok_or(HalError::IllegalArgument)
    }
}

fn backend_error<E: std::fmt::Display>(err: E) -> HalError {
    HalError::Backend(err.to_string())
}

fn build_error(err: cpal::BuildStreamError) -> HalError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => HalError::Disconnected,
        cpal::BuildStreamError::StreamConfigNotSupported => HalError::InvalidFormat,
        cpal::BuildStreamError::InvalidArgument => HalError::IllegalArgument,
        other => HalError::Backend(other.to_string()),
    }
}

/// Stream configuration picked for a request.
struct Negotiated {
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
    fixed_buffer: bool,
}

/// Pick an i16 (or f32) configuration at exactly the requested rate and
/// channel count.
fn negotiate(
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    request: &StreamRequest,
) -> Result<Negotiated, HalError> {
    let rate = cpal::SampleRate(request.sample_rate);
    let matching: Vec<_> = ranges
        .into_iter()
        .filter(|range| range.channels() == request.channel_count)
        .filter(|range| {
            matches!(
                range.sample_format(),
                cpal::SampleFormat::I16 | cpal::SampleFormat::F32
            )
        })
        .collect();
    if matching.is_empty() {
        return Err(HalError::InvalidFormat);
    }

    let range = matching
        .iter()
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .min_by_key(|range| match range.sample_format() {
            cpal::SampleFormat::I16 => 0,
            _ => 1,
        })
        .ok_or(HalError::InvalidRate)?;

    let frames = request.frames_per_callback;
    let fixed_buffer = match range.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => *min <= frames && frames <= *max,
        cpal::SupportedBufferSize::Unknown => false,
    };

    Ok(Negotiated {
        config: cpal::StreamConfig {
            channels: request.channel_count,
            sample_rate: rate,
            buffer_size: if fixed_buffer {
                cpal::BufferSize::Fixed(frames)
            } else {
                cpal::BufferSize::Default
            },
        },
        format: range.sample_format(),
        fixed_buffer,
    })
}

fn properties(request: &StreamRequest, negotiated: &Negotiated) -> StreamProperties {
    StreamProperties {
        direction: request.direction,
        sample_rate: negotiated.config.sample_rate.0,
        channel_count: negotiated.config.channels,
        buffer_capacity_frames: request.frames_per_callback * FRAMER_CAPACITY_PERIODS,
        frames_per_callback: request.frames_per_callback,
        performance_mode: if negotiated.fixed_buffer {
            PerformanceMode::LowLatency
        } else {
            PerformanceMode::None
        },
    }
}

/// Forward cpal stream errors. `DeviceNotAvailable` means the stream is gone
/// and is reported once as a close.
fn error_forwarder(
    props: StreamProperties,
    errors: Arc<dyn ErrorCallback>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let mut reported = false;
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => {
            if !reported {
                reported = true;
                errors.on_error_before_close(&props, &HalError::Disconnected);
                errors.on_error_after_close(&props, &HalError::Disconnected);
            }
        }
        other => log::warn!("[CpalHost] {} stream error: {}", props.direction, other),
    }
}

/// Regroups captured samples into whole periods.
struct InputFramer {
    callback: Box<dyn InputCallback>,
    props: StreamProperties,
    period: Vec<i16>,
    filled: usize,
    stopped: Arc<AtomicBool>,
}

impl InputFramer {
    fn push<T: Copy>(&mut self, data: &[T])
    where
        i16: cpal::FromSample<T>,
    {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        for &sample in data {
            self.period[self.filled] = i16::from_sample(sample);
            self.filled += 1;
            if self.filled == self.period.len() {
                self.filled = 0;
                if self.callback.on_audio_ready(&self.props, &self.period) == CallbackResult::Stop {
                    self.stopped.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}

/// Serves playback samples from whole periods produced by the handler.
struct OutputFramer {
    callback: Box<dyn OutputCallback>,
    props: StreamProperties,
    period: Vec<i16>,
    read: usize,
    stopped: Arc<AtomicBool>,
}

impl OutputFramer {
    fn pull<T: Copy + cpal::FromSample<i16>>(&mut self, data: &mut [T]) {
        for slot in data.iter_mut() {
            if self.read == self.period.len() {
                self.read = 0;
                if self.stopped.load(Ordering::Relaxed) {
                    self.period.fill(0);
                } else if self.callback.on_audio_ready(&self.props, &mut self.period)
                    == CallbackResult::Stop
                {
                    self.stopped.store(true, Ordering::Relaxed);
                }
            }
            *slot = T::from_sample_(self.period[self.read]);
            self.read += 1;
        }
    }
}

/// Wrapper to make `cpal::Stream` Send.
struct StreamHolder(Option<cpal::Stream>);

// SAFETY: the stream is owned by one CpalStream and only touched from the
// engine's control thread under the engine lock.
unsafe impl Send for StreamHolder {}

struct CpalStream {
    holder: StreamHolder,
    props: StreamProperties,
    stopped: Arc<AtomicBool>,
}

impl HardwareStream for CpalStream {
    fn properties(&self) -> StreamProperties {
        self.props
    }

    fn set_buffer_size_frames(&mut self, _frames: u32) -> Result<u32, HalError> {
        // cpal fixes the buffer size when the stream is built.
        Err(HalError::Unimplemented)
    }

    fn request_start(&mut self) -> Result<(), HalError> {
        let stream = self.holder.0.as_ref().ok_or(HalError::Closed)?;
        self.stopped.store(false, Ordering::Relaxed);
        stream.play().map_err(backend_error)
    }

    fn request_stop(&mut self) -> Result<(), HalError> {
        let stream = self.holder.0.as_ref().ok_or(HalError::Closed)?;
        self.stopped.store(true, Ordering::Relaxed);
        stream.pause().map_err(backend_error)
    }

    fn close(&mut self) -> Result<(), HalError> {
        let stream = self.holder.0.take().ok_or(HalError::Closed)?;
        self.stopped.store(true, Ordering::Relaxed);
        // Best effort: some backends cannot pause a disconnected stream.
        let _ = stream.pause();
        drop(stream);
        Ok(())
    }
}

impl AudioHost for CpalHost {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        callback: Box<dyn InputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        let device = self.find_device(Direction::Input, request.device_id)?;
        let ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(backend_error)?
            .collect();
        let negotiated = negotiate(ranges, request)?;
        let props = properties(request, &negotiated);
        let stopped = Arc::new(AtomicBool::new(true));

        let mut framer = InputFramer {
            callback,
            props,
            period: vec![0; props.frames_per_callback as usize * props.channel_count as usize],
            filled: 0,
            stopped: Arc::clone(&stopped),
        };
        let on_error = error_forwarder(props, errors);

        let stream = match negotiated.format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &negotiated.config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| framer.push(data),
                on_error,
                None,
            ),
            _ => device.build_input_stream(
                &negotiated.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| framer.push(data),
                on_error,
                None,
            ),
        }
        .map_err(build_error)?;

        log::info!(
            "[CpalHost] Input on '{}': {} Hz, {} ch, {:?}, fixed buffer: {}",
            device.name().unwrap_or_default(),
            props.sample_rate,
            props.channel_count,
            negotiated.format,
            negotiated.fixed_buffer
        );

        Ok(Box::new(CpalStream {
            holder: StreamHolder(Some(stream)),
            props,
            stopped,
        }))
    }

    fn open_output(
        &self,
        request: &StreamRequest,
        callback: Box<dyn OutputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        let device = self.find_device(Direction::Output, request.device_id)?;
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(backend_error)?
            .collect();
        let negotiated = negotiate(ranges, request)?;
        let props = properties(request, &negotiated);
        let stopped = Arc::new(AtomicBool::new(true));

        let period_len = props.frames_per_callback as usize * props.channel_count as usize;
        let mut framer = OutputFramer {
            callback,
            props,
            period: vec![0; period_len],
            read: period_len,
            stopped: Arc::clone(&stopped),
        };
        let on_error = error_forwarder(props, errors);

        let stream = match negotiated.format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &negotiated.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| framer.pull(data),
                on_error,
                None,
            ),
            _ => device.build_output_stream(
                &negotiated.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| framer.pull(data),
                on_error,
                None,
            ),
        }
        .map_err(build_error)?;

        log::info!(
            "[CpalHost] Output on '{}': {} Hz, {} ch, {:?}, fixed buffer: {}",
            device.name().unwrap_or_default(),
            props.sample_rate,
            props.channel_count,
            negotiated.format,
            negotiated.fixed_buffer
        );

        Ok(Box::new(CpalStream {
            holder: StreamHolder(Some(stream)),
            props,
            stopped,
        }))
    }
}
