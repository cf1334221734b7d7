//! Device-change recovery worker.
//!
//! Hardware error notifications arrive on a driver thread where nothing may
//! block or reopen streams. Handlers only post an [`EngineEvent`]; this
//! worker, running on its own thread with a current-thread Tokio runtime,
//! receives the events, lets a burst settle (an unplug closes both
//! directions but each fires separately) and then runs recovery against
//! the engine through a `Weak` reference. The worker exits once every
//! sender is gone, which happens when the engine is dropped.

use std::sync::{Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use super::core::EngineCore;
use super::link::EngineEvent;

/// How long to wait for the rest of a notification burst.
pub const RECOVERY_SETTLE_MS: u64 = 30;

pub(crate) fn spawn_recovery_worker(
    core: Weak<Mutex<EngineCore>>,
    mut events: UnboundedReceiver<EngineEvent>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("live-effect-recovery".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    tracing::error!(error = %err, "failed to build recovery runtime");
                    return;
                }
            };

            rt.block_on(async move {
                while let Some(first) = events.recv().await {
                    let mut batch = vec![first];
                    tokio::time::sleep(Duration::from_millis(RECOVERY_SETTLE_MS)).await;
                    while let Ok(event) = events.try_recv() {
                        batch.push(event);
                    }

                    let Some(core) = core.upgrade() else {
                        break;
                    };
                    tracing::debug!(events = batch.len(), "recovery batch");
                    let mut guard = core.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.apply_events(batch);
                }
                tracing::debug!("recovery worker exiting");
            });
        })
}

/// Collapse a batch into what recovery has to do.
///
/// Returns the faults to report and whether any stream was disconnected.
pub(crate) fn summarize(batch: Vec<EngineEvent>) -> (Vec<EngineEvent>, bool) {
    let mut faults = Vec::new();
    let mut disconnected = false;
    for event in batch {
        match event {
            EngineEvent::StreamDisconnected { .. } => disconnected = true,
            fault @ EngineEvent::CallbackFault { .. } => faults.push(fault),
        }
    }
    (faults, disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Direction, HalError};

    #[test]
    fn test_burst_collapses_to_one_recovery() {
        let batch = vec![
            EngineEvent::StreamDisconnected {
                direction: Direction::Output,
                error: HalError::Disconnected,
            },
            EngineEvent::StreamDisconnected {
                direction: Direction::Input,
                error: HalError::Disconnected,
            },
        ];
        let (faults, disconnected) = summarize(batch);
        assert!(faults.is_empty());
        assert!(disconnected);
    }

    #[test]
    fn test_faults_are_kept_apart() {
        let fault = EngineEvent::CallbackFault {
            direction: Direction::Input,
            expected_bytes: 640,
            actual_bytes: 320,
        };
        let (faults, disconnected) = summarize(vec![fault.clone()]);
        assert_eq!(faults, vec![fault]);
        assert!(!disconnected);
    }
}
