//! Engine module housing the duplex stream orchestration.
//!
//! `state` holds the per-direction lifecycle machine, `link` the non-owning
//! path from callback handlers back to the engine, `recovery` the worker
//! that turns hardware notifications into device-change recovery, and
//! `core` the [`DuplexEngine`] itself.

pub mod core;
pub mod link;
pub mod notice;
pub mod recovery;
pub mod state;

pub use self::core::{DuplexEngine, DuplexEngineBuilder, RecoveryMode};
pub use link::{EngineEvent, EngineLink};
pub use notice::{EngineNotice, NoticeKind};
pub use recovery::RECOVERY_SETTLE_MS;
pub use state::{StreamState, StreamStatus};
