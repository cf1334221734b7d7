// FrameBufferChannel - one-period handoff between the input and output callbacks
//
// The input callback publishes each captured period; the output callback
// consumes the most recent one. Both sides take the same mutex for exactly one
// fixed-size copy, so a period is never observed half-written.
//
// Buffer flow:
// 1. Input thread locks, copies the period in, bumps the sequence number
// 2. Output thread locks, copies the latest period out, records the sequence
// 3. If the output runs ahead, the same period is replayed (Repeated)
// 4. Before the first publish, the zero-initialized slot yields silence

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Outcome of one output-side read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// A period not read before, tagged with its sequence number.
    Fresh(u64),
    /// The output ran ahead of the input; the last period was replayed.
    Repeated(u64),
    /// Nothing has been published yet; the destination holds zeros.
    Silence,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelStats {
    pub periods_written: u64,
    pub periods_read_fresh: u64,
    pub periods_repeated: u64,
    pub periods_silent: u64,
}

struct FrameSlot {
    samples: Box<[i16]>,
    /// Sequence number of the period in `samples`; 0 means never written.
    sequence: u64,
    last_consumed: u64,
}

/// Fixed-capacity buffer holding exactly one period of interleaved i16 samples.
pub struct FrameBufferChannel {
    slot: Mutex<FrameSlot>,
    period_samples: usize,
    periods_written: AtomicU64,
    periods_read_fresh: AtomicU64,
    periods_repeated: AtomicU64,
    periods_silent: AtomicU64,
}

/// Error returned when a copy would not match the channel's period length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl FrameBufferChannel {
    /// Allocate a zero-filled channel for `period_samples` interleaved samples.
    ///
    /// This is the only allocation; publish and consume are copy-only.
    pub fn new(period_samples: usize) -> Self {
        Self {
            slot: Mutex::new(FrameSlot {
                samples: vec![0_i16; period_samples].into_boxed_slice(),
                sequence: 0,
                last_consumed: 0,
            }),
            period_samples,
            periods_written: AtomicU64::new(0),
            periods_read_fresh: AtomicU64::new(0),
            periods_repeated: AtomicU64::new(0),
            periods_silent: AtomicU64::new(0),
        }
    }

    pub fn period_samples(&self) -> usize {
        self.period_samples
    }

    pub fn period_bytes(&self) -> usize {
        self.period_samples * std::mem::size_of::<i16>()
    }

    /// Copy one captured period in. Returns the period's sequence number.
    ///
    /// A poisoned lock is recovered: the slot holds plain samples, so a
    /// panicking peer cannot leave it structurally inconsistent.
    pub fn publish(&self, frames: &[i16]) -> Result<u64, LengthMismatch> {
        if frames.len() != self.period_samples {
            return Err(LengthMismatch {
                expected: self.period_samples,
                actual: frames.len(),
            });
        }

        let sequence = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.samples.copy_from_slice(frames);
            slot.sequence += 1;
            slot.sequence
        };
        self.periods_written.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    /// Copy the latest period out into `dest`.
    pub fn consume_into(&self, dest: &mut [i16]) -> Result<ReadKind, LengthMismatch> {
        if dest.len() != self.period_samples {
            return Err(LengthMismatch {
                expected: self.period_samples,
                actual: dest.len(),
            });
        }

        let kind = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            dest.copy_from_slice(&slot.samples);
            let sequence = slot.sequence;
            if sequence == 0 {
                ReadKind::Silence
            } else if sequence == slot.last_consumed {
                ReadKind::Repeated(sequence)
            } else {
                slot.last_consumed = sequence;
                ReadKind::Fresh(sequence)
            }
        };

        let counter = match kind {
            ReadKind::Fresh(_) => &self.periods_read_fresh,
            ReadKind::Repeated(_) => &self.periods_repeated,
            ReadKind::Silence => &self.periods_silent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(kind)
    }

    /// Zero the slot and forget the sequence, as if freshly allocated.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.samples.fill(0);
        slot.sequence = 0;
        slot.last_consumed = 0;
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            periods_written: self.periods_written.load(Ordering::Relaxed),
            periods_read_fresh: self.periods_read_fresh.load(Ordering::Relaxed),
            periods_repeated: self.periods_repeated.load(Ordering::Relaxed),
            periods_silent: self.periods_silent.load(Ordering::Relaxed),
        }
    }
}
