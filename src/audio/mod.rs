// Audio module - real-time period handoff between the input and output streams

pub mod callback;
pub mod frame_buffer;
pub mod period_tap;

// Re-export commonly used types for convenience
pub use callback::{InputCallbackHandler, OutputCallbackHandler, PeriodObserver, StreamErrorHandler};
pub use frame_buffer::{ChannelStats, FrameBufferChannel, LengthMismatch, ReadKind};
pub use period_tap::{PeriodTap, PeriodTapReader, TapFrame, DEFAULT_TAP_FRAMES};
