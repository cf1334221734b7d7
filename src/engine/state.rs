//! Per-direction stream lifecycle state machine.
//!
//! ```text
//! Closed -> Opening -> Open -> Running -> Stopping -> Open -> Closed
//!              |         |        |          |
//!              v         v        v          v
//!           Closed     Error <- Error <-   Error -> Closed
//! ```
//!
//! The state lives in an atomic so the real-time callback and the error
//! callback can read it, and force `Error`, without taking the engine lock.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::AudioError;
use crate::hal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StreamState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Running = 3,
    Stopping = 4,
    Error = 5,
}

impl StreamState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => StreamState::Opening,
            2 => StreamState::Open,
            3 => StreamState::Running,
            4 => StreamState::Stopping,
            5 => StreamState::Error,
            _ => StreamState::Closed,
        }
    }

    /// Whether the transition table allows `self -> to`.
    pub fn can_transition_to(self, to: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, to),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Running)
                | (Open, Closed)
                | (Open, Error)
                | (Running, Stopping)
                | (Running, Error)
                | (Stopping, Open)
                | (Stopping, Error)
                | (Error, Closed)
        )
    }
}

/// Shared state cell of one direction.
#[derive(Debug)]
pub struct StreamStatus {
    direction: Direction,
    state: AtomicU8,
}

impl StreamStatus {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: AtomicU8::new(StreamState::Closed as u8),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` if the table allows it from the current state.
    ///
    /// # Errors
    /// `AudioError::InvalidTransition` when the move is not allowed; the
    /// state is left untouched.
    pub fn transition(&self, to: StreamState) -> Result<StreamState, AudioError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = StreamState::from_u8(current);
            if !from.can_transition_to(to) {
                return Err(AudioError::InvalidTransition {
                    direction: self.direction,
                    from,
                    to,
                });
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }

    /// Force `Error` from `Open`, `Running` or `Stopping`.
    ///
    /// Returns false if the stream was in any other state.
    pub fn force_error(&self) -> bool {
        self.transition(StreamState::Error).is_ok()
    }

    /// Drive the state to `Closed` through whatever legal path remains.
    pub fn settle_closed(&self) {
        loop {
            let next = match self.get() {
                StreamState::Closed => return,
                StreamState::Opening | StreamState::Open | StreamState::Error => {
                    StreamState::Closed
                }
                StreamState::Running | StreamState::Stopping => StreamState::Error,
            };
            let _ = self.transition(next);
        }
    }

    /// Callbacks stop once the stream is no longer meant to run.
    pub fn should_stop(&self) -> bool {
        matches!(
            self.get(),
            StreamState::Stopping | StreamState::Error | StreamState::Closed
        )
    }
}
