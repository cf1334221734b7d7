//! Non-owning path from callback handlers back to the engine.
//!
//! Handlers never hold the engine itself. They hold an [`EngineLink`], a
//! detachable event sender the engine attaches when it opens streams and
//! detaches before it closes them. Events posted while detached are dropped.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::hal::{Direction, HalError};

/// Events posted by callback handlers to the recovery worker.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Hardware closed a stream on its own (unplug, route change).
    StreamDisconnected { direction: Direction, error: HalError },
    /// A real-time callback saw a period that breaks the layout.
    CallbackFault {
        direction: Direction,
        expected_bytes: usize,
        actual_bytes: usize,
    },
}

impl EngineEvent {
    pub fn direction(&self) -> Direction {
        match self {
            EngineEvent::StreamDisconnected { direction, .. } => *direction,
            EngineEvent::CallbackFault { direction, .. } => *direction,
        }
    }
}

#[derive(Clone, Default)]
pub struct EngineLink {
    sender: Arc<Mutex<Option<UnboundedSender<EngineEvent>>>>,
}

impl EngineLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sender: UnboundedSender<EngineEvent>) {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub fn detach(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_attached(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Post an event. Returns false when detached or the worker is gone.
    ///
    /// Called from fault paths and error callbacks only, never per period.
    pub fn report(&self, event: EngineEvent) -> bool {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_report_requires_attachment() {
        let link = EngineLink::new();
        let event = EngineEvent::StreamDisconnected {
            direction: Direction::Input,
            error: HalError::Disconnected,
        };
        assert!(!link.report(event.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        link.attach(tx);
        assert!(link.is_attached());
        assert!(link.report(event.clone()));
        assert_eq!(rx.try_recv().unwrap(), event);

        link.detach();
        assert!(!link.is_attached());
        assert!(!link.report(event));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_attachment() {
        let link = EngineLink::new();
        let handler_side = link.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        link.attach(tx);
        assert!(handler_side.is_attached());
        link.detach();
        assert!(!handler_side.is_attached());
    }
}
