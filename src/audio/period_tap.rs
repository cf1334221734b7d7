// PeriodTap - lock-free copy of every period for a non-real-time consumer
//
// A PeriodObserver that forwards each captured and each played period to a
// reader thread (WAV recorder, meters, host UI) through pre-allocated frames
// cycled by two SPSC ring buffers per direction. The real-time side never
// allocates and never waits: if the reader lags and no free frame is left,
// the period is dropped and counted.
//
// Frame flow (per direction):
// 1. Callback thread pops an empty frame from POOL_QUEUE
// 2. Callback thread copies the period in and pushes it to DATA_QUEUE
// 3. Reader pops the filled frame from DATA_QUEUE and inspects it
// 4. Reader pushes the frame back to POOL_QUEUE

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rtrb::{Consumer, Producer};

use crate::audio::callback::PeriodObserver;
use crate::hal::Direction;

/// Pre-allocated frames per direction.
pub const DEFAULT_TAP_FRAMES: usize = 32;

/// One tapped period.
#[derive(Debug, Clone)]
pub struct TapFrame {
    pub direction: Direction,
    /// Per-direction running period index, starting at 1.
    pub sequence: u64,
    pub samples: Vec<i16>,
}

impl TapFrame {
    /// Raw 16-bit PCM bytes of the period (native byte order).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}

/// Callback-thread end of one direction.
struct LaneWriter {
    data_producer: Producer<TapFrame>,
    pool_consumer: Consumer<TapFrame>,
    sequence: u64,
}

/// Reader end of one direction.
struct LaneReader {
    data_consumer: Consumer<TapFrame>,
    pool_producer: Producer<TapFrame>,
}

fn lane(
    direction: Direction,
    frame_count: usize,
    period_samples: usize,
) -> (LaneWriter, LaneReader) {
    let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(frame_count);
    let (data_producer, data_consumer) = rtrb::RingBuffer::new(frame_count);

    for _ in 0..frame_count {
        let frame = TapFrame {
            direction,
            sequence: 0,
            samples: vec![0_i16; period_samples],
        };
        // The pool was created with room for exactly frame_count frames.
        let _ = pool_producer.push(frame);
    }

    (
        LaneWriter {
            data_producer,
            pool_consumer,
            sequence: 0,
        },
        LaneReader {
            data_consumer,
            pool_producer,
        },
    )
}

/// Observer half, installed on the engine.
pub struct PeriodTap {
    capture: Mutex<LaneWriter>,
    playback: Mutex<LaneWriter>,
    period_samples: usize,
    dropped_capture: AtomicU64,
    dropped_playback: AtomicU64,
}

/// Reader half, owned by the consumer thread.
pub struct PeriodTapReader {
    capture: LaneReader,
    playback: LaneReader,
}

impl PeriodTap {
    /// Create a tap with `frame_count` pre-allocated frames per direction
    ///
    /// # Arguments
    /// * `period_samples` - Interleaved samples per period
    /// * `frame_count` - Frames per direction (typical: 16-64)
    ///
    /// # Panics
    /// Panics if frame_count is 0
    pub fn new(period_samples: usize, frame_count: usize) -> (Arc<PeriodTap>, PeriodTapReader) {
        assert!(frame_count > 0, "frame_count must be greater than 0");

        let (capture_writer, capture_reader) = lane(Direction::Input, frame_count, period_samples);
        let (playback_writer, playback_reader) =
            lane(Direction::Output, frame_count, period_samples);

        let tap = Arc::new(PeriodTap {
            capture: Mutex::new(capture_writer),
            playback: Mutex::new(playback_writer),
            period_samples,
            dropped_capture: AtomicU64::new(0),
            dropped_playback: AtomicU64::new(0),
        });
        let reader = PeriodTapReader {
            capture: capture_reader,
            playback: playback_reader,
        };
        (tap, reader)
    }

    pub fn dropped(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Input => self.dropped_capture.load(Ordering::Relaxed),
            Direction::Output => self.dropped_playback.load(Ordering::Relaxed),
        }
    }

    fn forward(&self, direction: Direction, frames: &[i16]) {
        let (writer, dropped) = match direction {
            Direction::Input => (&self.capture, &self.dropped_capture),
            Direction::Output => (&self.playback, &self.dropped_playback),
        };

        // Each lane has a single callback thread; contention only happens
        // while a stream is being swapped during recovery.
        let Ok(mut writer) = writer.try_lock() else {
            dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if frames.len() != self.period_samples {
            dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Ok(mut frame) = writer.pool_consumer.pop() else {
            dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        writer.sequence += 1;
        frame.sequence = writer.sequence;
        frame.samples.copy_from_slice(frames);
        if writer.data_producer.push(frame).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl PeriodObserver for PeriodTap {
    fn on_capture(&self, frames: &[i16]) {
        self.forward(Direction::Input, frames);
    }

    fn on_playback(&self, frames: &[i16]) {
        self.forward(Direction::Output, frames);
    }
}

impl PeriodTapReader {
    /// Hand every pending frame of `direction` to `f`, oldest first, and
    /// return the frames to the pool. Returns how many were drained.
    pub fn drain<F: FnMut(&TapFrame)>(&mut self, direction: Direction, mut f: F) -> usize {
        let lane = match direction {
            Direction::Input => &mut self.capture,
            Direction::Output => &mut self.playback,
        };

        let mut drained = 0;
        while let Ok(frame) = lane.data_consumer.pop() {
            f(&frame);
            drained += 1;
            // Pool and data queues share capacity, so this cannot be full.
            let _ = lane.pool_producer.push(frame);
        }
        drained
    }
}
