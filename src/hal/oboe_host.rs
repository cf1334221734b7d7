//! Oboe-based audio host for Android
//!
//! Streams are opened as `AudioStreamAsync` with 16-bit frames. oboe-rs fixes
//! the channel layout in the frame type, so mono and stereo are the supported
//! channel counts; anything else is refused with `InvalidFormat`.
//!
//! Oboe delivers data and error callbacks to the same callback object. The
//! adapters here split them back into the engine's data callback and its
//! shared [`ErrorCallback`].

use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use oboe::{
    AudioInputCallback, AudioInputStreamSafe, AudioOutputCallback, AudioOutputStreamSafe,
    AudioStream, AudioStreamBase, AudioStreamBuilder, DataCallbackResult,
};

use super::{
    AudioApi, AudioHost, CallbackResult, Direction, ErrorCallback, HalError, HardwareStream,
    InputCallback, InputPreset, OutputCallback, PerformanceMode, SampleRateConversionQuality,
    SessionId, SharingMode, StreamProperties, StreamRequest, Usage,
};

#[derive(Debug, Default)]
pub struct OboeHost {
    _unit: (),
}

impl OboeHost {
    pub fn new() -> Self {
        Self::default()
    }
}

fn map_error(err: oboe::Error) -> HalError {
    match err {
        oboe::Error::Disconnected => HalError::Disconnected,
        oboe::Error::IllegalArgument | oboe::Error::OutOfRange => HalError::IllegalArgument,
        oboe::Error::InvalidState => HalError::InvalidState,
        oboe::Error::InvalidFormat => HalError::InvalidFormat,
        oboe::Error::InvalidRate => HalError::InvalidRate,
        oboe::Error::Unavailable | oboe::Error::NoService => HalError::Unavailable,
        oboe::Error::Timeout => HalError::Timeout,
        oboe::Error::Closed => HalError::Closed,
        oboe::Error::Unimplemented => HalError::Unimplemented,
        other => HalError::Backend(format!("{:?}", other)),
    }
}

fn to_oboe_api(api: AudioApi) -> oboe::AudioApi {
    match api {
        AudioApi::Unspecified => oboe::AudioApi::Unspecified,
        AudioApi::OpenSLES => oboe::AudioApi::OpenSLES,
        AudioApi::AAudio => oboe::AudioApi::AAudio,
    }
}

fn to_oboe_sharing(mode: SharingMode) -> oboe::SharingMode {
    match mode {
        SharingMode::Exclusive => oboe::SharingMode::Exclusive,
        SharingMode::Shared => oboe::SharingMode::Shared,
    }
}

fn to_oboe_performance(mode: PerformanceMode) -> oboe::PerformanceMode {
    match mode {
        PerformanceMode::None => oboe::PerformanceMode::None,
        PerformanceMode::PowerSaving => oboe::PerformanceMode::PowerSaving,
        PerformanceMode::LowLatency => oboe::PerformanceMode::LowLatency,
    }
}

fn from_oboe_performance(mode: oboe::PerformanceMode) -> PerformanceMode {
    match mode {
        oboe::PerformanceMode::LowLatency => PerformanceMode::LowLatency,
        oboe::PerformanceMode::PowerSaving => PerformanceMode::PowerSaving,
        _ => PerformanceMode::None,
    }
}

fn to_oboe_preset(preset: InputPreset) -> oboe::InputPreset {
    match preset {
        InputPreset::Generic => oboe::InputPreset::Generic,
        InputPreset::Camcorder => oboe::InputPreset::Camcorder,
        InputPreset::VoiceRecognition => oboe::InputPreset::VoiceRecognition,
        InputPreset::VoiceCommunication => oboe::InputPreset::VoiceCommunication,
        InputPreset::Unprocessed => oboe::InputPreset::Unprocessed,
        InputPreset::VoicePerformance => oboe::InputPreset::VoicePerformance,
    }
}

fn to_oboe_usage(usage: Usage) -> oboe::Usage {
    match usage {
        Usage::Media => oboe::Usage::Media,
        Usage::VoiceCommunication => oboe::Usage::VoiceCommunication,
        Usage::VoiceCommunicationSignalling => oboe::Usage::VoiceCommunicationSignalling,
        Usage::Alarm => oboe::Usage::Alarm,
        Usage::Notification => oboe::Usage::Notification,
        Usage::NotificationRingtone => oboe::Usage::NotificationRingtone,
        Usage::NotificationEvent => oboe::Usage::NotificationEvent,
        Usage::AssistanceAccessibility => oboe::Usage::AssistanceAccessibility,
        Usage::AssistanceNavigationGuidance => oboe::Usage::AssistanceNavigationGuidance,
        Usage::AssistanceSonification => oboe::Usage::AssistanceSonification,
        Usage::Game => oboe::Usage::Game,
        Usage::Assistant => oboe::Usage::Assistant,
    }
}

fn to_oboe_session(session: SessionId) -> oboe::SessionId {
    match session {
        SessionId::Allocate => oboe::SessionId::Allocate,
        SessionId::None => oboe::SessionId::None,
        SessionId::Id(id) => {
            log::warn!(
                "[OboeHost] Explicit session id {} is not supported, allocating one",
                id
            );
            oboe::SessionId::Allocate
        }
    }
}

fn to_oboe_quality(quality: SampleRateConversionQuality) -> oboe::SampleRateConversionQuality {
    match quality {
        SampleRateConversionQuality::None => oboe::SampleRateConversionQuality::None,
        SampleRateConversionQuality::Fastest => oboe::SampleRateConversionQuality::Fastest,
        SampleRateConversionQuality::Low => oboe::SampleRateConversionQuality::Low,
        SampleRateConversionQuality::Medium => oboe::SampleRateConversionQuality::Medium,
        SampleRateConversionQuality::High => oboe::SampleRateConversionQuality::High,
        SampleRateConversionQuality::Best => oboe::SampleRateConversionQuality::Best,
    }
}

/// Builder with every direction-independent option of the request applied.
fn base_builder(request: &StreamRequest) -> AudioStreamBuilder<oboe::Output, oboe::Unspecified, oboe::Unspecified> {
    AudioStreamBuilder::default()
        .set_audio_api(to_oboe_api(request.audio_api))
        .set_device_id(request.device_id)
        .set_sharing_mode(to_oboe_sharing(request.sharing_mode))
        .set_performance_mode(to_oboe_performance(request.performance_mode))
        .set_sample_rate(request.sample_rate as i32)
        .set_frames_per_callback(request.frames_per_callback as i32)
        .set_session_id(to_oboe_session(request.session_id))
        .set_channel_conversion_allowed(request.channel_conversion_allowed)
        .set_format_conversion_allowed(request.format_conversion_allowed)
        .set_sample_rate_conversion_quality(to_oboe_quality(request.rate_conversion_quality))
}

/// Properties reported before the stream exists, replaced after open.
fn requested_properties(request: &StreamRequest) -> StreamProperties {
    StreamProperties {
        direction: request.direction,
        sample_rate: request.sample_rate,
        channel_count: request.channel_count,
        buffer_capacity_frames: 0,
        frames_per_callback: request.frames_per_callback,
        performance_mode: request.performance_mode,
    }
}

fn negotiated_properties<S: AudioStreamBase>(direction: Direction, stream: &S) -> StreamProperties {
    let channel_count = match stream.get_channel_count() {
        oboe::ChannelCount::Mono => 1,
        oboe::ChannelCount::Stereo => 2,
        _ => 0,
    };
    StreamProperties {
        direction,
        sample_rate: stream.get_sample_rate().max(0) as u32,
        channel_count,
        buffer_capacity_frames: stream.get_buffer_capacity_in_frames().max(0) as u32,
        frames_per_callback: stream.get_frames_per_callback().max(0) as u32,
        performance_mode: from_oboe_performance(stream.get_performance_mode()),
    }
}

/// Flattens oboe's typed frames to interleaved samples and back.
trait Interleaved: Copy {
    fn read_into(frames: &[Self], out: &mut [i16]) -> usize;
    fn write_from(samples: &[i16], frames: &mut [Self]);
}

impl Interleaved for i16 {
    fn read_into(frames: &[Self], out: &mut [i16]) -> usize {
        let n = frames.len().min(out.len());
        out[..n].copy_from_slice(&frames[..n]);
        n
    }

    fn write_from(samples: &[i16], frames: &mut [Self]) {
        let n = frames.len().min(samples.len());
        frames[..n].copy_from_slice(&samples[..n]);
    }
}

impl Interleaved for (i16, i16) {
    fn read_into(frames: &[Self], out: &mut [i16]) -> usize {
        let mut n = 0;
        for (&(left, right), pair) in frames.iter().zip(out.chunks_exact_mut(2)) {
            pair[0] = left;
            pair[1] = right;
            n += 2;
        }
        n
    }

    fn write_from(samples: &[i16], frames: &mut [Self]) {
        for (frame, pair) in frames.iter_mut().zip(samples.chunks_exact(2)) {
            *frame = (pair[0], pair[1]);
        }
    }
}

/// State shared by both adapters.
struct AdapterShared {
    props: Arc<OnceCell<StreamProperties>>,
    requested: StreamProperties,
    errors: Arc<dyn ErrorCallback>,
    /// Interleaved scratch, sized for twice the requested period.
    scratch: Vec<i16>,
}

impl AdapterShared {
    fn new(request: &StreamRequest, errors: Arc<dyn ErrorCallback>) -> Self {
        let period = request.frames_per_callback as usize * request.channel_count as usize;
        Self {
            props: Arc::new(OnceCell::new()),
            requested: requested_properties(request),
            errors,
            scratch: vec![0; period * 2],
        }
    }

    fn props(&self) -> StreamProperties {
        self.props.get().copied().unwrap_or(self.requested)
    }
}

fn to_oboe_result(result: CallbackResult) -> DataCallbackResult {
    match result {
        CallbackResult::Continue => DataCallbackResult::Continue,
        CallbackResult::Stop => DataCallbackResult::Stop,
    }
}

struct InputAdapter<C> {
    callback: Box<dyn InputCallback>,
    shared: AdapterShared,
    _channels: PhantomData<C>,
}

struct OutputAdapter<C> {
    callback: Box<dyn OutputCallback>,
    shared: AdapterShared,
    _channels: PhantomData<C>,
}

macro_rules! impl_adapters {
    ($channels:ty, $frame:ty) => {
        impl AudioInputCallback for InputAdapter<$channels> {
            type FrameType = (i16, $channels);

            fn on_error_before_close(
                &mut self,
                _stream: &mut dyn AudioInputStreamSafe,
                error: oboe::Error,
            ) {
                let props = self.shared.props();
                self.shared.errors.on_error_before_close(&props, &map_error(error));
            }

            fn on_error_after_close(
                &mut self,
                _stream: &mut dyn AudioInputStreamSafe,
                error: oboe::Error,
            ) {
                let props = self.shared.props();
                self.shared.errors.on_error_after_close(&props, &map_error(error));
            }

            fn on_audio_ready(
                &mut self,
                _stream: &mut dyn AudioInputStreamSafe,
                frames: &[$frame],
            ) -> DataCallbackResult {
                let props = self.shared.props();
                let n = <$frame as Interleaved>::read_into(frames, &mut self.shared.scratch);
                to_oboe_result(self.callback.on_audio_ready(&props, &self.shared.scratch[..n]))
            }
        }

        impl AudioOutputCallback for OutputAdapter<$channels> {
            type FrameType = (i16, $channels);

            fn on_error_before_close(
                &mut self,
                _stream: &mut dyn AudioOutputStreamSafe,
                error: oboe::Error,
            ) {
                let props = self.shared.props();
                self.shared.errors.on_error_before_close(&props, &map_error(error));
            }

            fn on_error_after_close(
                &mut self,
                _stream: &mut dyn AudioOutputStreamSafe,
                error: oboe::Error,
            ) {
                let props = self.shared.props();
                self.shared.errors.on_error_after_close(&props, &map_error(error));
            }

            fn on_audio_ready(
                &mut self,
                _stream: &mut dyn AudioOutputStreamSafe,
                frames: &mut [$frame],
            ) -> DataCallbackResult {
                let props = self.shared.props();
                let samples = frames.len() * props.channel_count.max(1) as usize;
                let n = samples.min(self.shared.scratch.len());
                let result = self.callback.on_audio_ready(&props, &mut self.shared.scratch[..n]);
                <$frame as Interleaved>::write_from(&self.shared.scratch[..n], frames);
                to_oboe_result(result)
            }
        }
    };
}

impl_adapters!(oboe::Mono, i16);
impl_adapters!(oboe::Stereo, (i16, i16));

/// Owning wrapper around an oboe stream.
struct OboeStream<S> {
    stream: Option<S>,
    props: StreamProperties,
}

// SAFETY: the oboe stream handle is owned by one OboeStream and only used
// from the engine's control thread under the engine lock; oboe's callbacks
// run on their own thread and never touch this handle.
unsafe impl<S> Send for OboeStream<S> {}

impl<S: AudioStream> HardwareStream for OboeStream<S> {
    fn properties(&self) -> StreamProperties {
        self.props
    }

    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::Closed)?;
        let applied = stream
            .set_buffer_size_in_frames(frames as i32)
            .map_err(map_error)?;
        Ok(applied.max(0) as u32)
    }

    fn request_start(&mut self) -> Result<(), HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::Closed)?;
        stream.request_start().map_err(map_error)
    }

    fn request_stop(&mut self) -> Result<(), HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::Closed)?;
        stream.request_stop().map_err(map_error)
    }

    fn close(&mut self) -> Result<(), HalError> {
        let mut stream = self.stream.take().ok_or(HalError::Closed)?;
        let result = stream.close().map_err(map_error);
        drop(stream);
        result
    }
}

macro_rules! open_typed {
    ($builder:expr, $direction:ty, $adapter:ident, $channels:ty, $callback:expr, $shared:expr, $dir:expr) => {{
        let props_cell = Arc::clone(&$shared.props);
        let stream = $builder
            .set_direction::<$direction>()
            .set_channel_count::<$channels>()
            .set_format::<i16>()
            .set_callback($adapter::<$channels> {
                callback: $callback,
                shared: $shared,
                _channels: PhantomData,
            })
            .open_stream()
            .map_err(map_error)?;
        let props = negotiated_properties($dir, &stream);
        let _ = props_cell.set(props);
        Box::new(OboeStream {
            stream: Some(stream),
            props,
        }) as Box<dyn HardwareStream>
    }};
}

impl AudioHost for OboeHost {
    fn name(&self) -> &'static str {
        "oboe"
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        callback: Box<dyn InputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        let builder = base_builder(request).set_input_preset(to_oboe_preset(request.input_preset));
        let shared = AdapterShared::new(request, errors);
        let stream = match request.channel_count {
            1 => open_typed!(builder, oboe::Input, InputAdapter, oboe::Mono, callback, shared, Direction::Input),
            2 => open_typed!(builder, oboe::Input, InputAdapter, oboe::Stereo, callback, shared, Direction::Input),
            _ => return Err(HalError::InvalidFormat),
        };
        log::info!("[OboeHost] Input opened: {:?}", stream.properties());
        Ok(stream)
    }

    fn open_output(
        &self,
        request: &StreamRequest,
        callback: Box<dyn OutputCallback>,
        errors: Arc<dyn ErrorCallback>,
    ) -> Result<Box<dyn HardwareStream>, HalError> {
        let builder = base_builder(request).set_usage(to_oboe_usage(request.usage));
        let shared = AdapterShared::new(request, errors);
        let stream = match request.channel_count {
            1 => open_typed!(builder, oboe::Output, OutputAdapter, oboe::Mono, callback, shared, Direction::Output),
            2 => open_typed!(builder, oboe::Output, OutputAdapter, oboe::Stereo, callback, shared, Direction::Output),
            _ => return Err(HalError::InvalidFormat),
        };
        log::info!("[OboeHost] Output opened: {:?}", stream.properties());
        Ok(stream)
    }

    fn is_aaudio_recommended(&self) -> bool {
        AudioStreamBuilder::<oboe::Output, oboe::Unspecified, oboe::Unspecified>::is_aaudio_recommended()
    }
}
