//! Tidewatch — a polling synchronization engine for dashboards that sit on
//! top of a remote monitoring API with no push channel.
//!
//! The core is [`sync::Synchronizer`]: it wraps a caller-supplied
//! [`sync::Producer`], polls it on a [`scheduler::ScheduleConfig`], skips
//! state updates when the payload [`fingerprint`] is unchanged, suspends
//! while the host is hidden ([`visibility`]), and never lets two fetches
//! overlap ([`guard`]). Each data kind gets its own synchronizer.
//!
//! [`monitor`] is a thin media-server monitoring client used by the
//! `tidewatch` binary to demonstrate the engine end to end.

pub mod config;
pub mod fingerprint;
pub mod guard;
pub mod monitor;
pub mod scheduler;
pub mod sync;
pub mod visibility;

pub use scheduler::{ResumeBehavior, ScheduleConfig};
pub use sync::{
    FnProducer, Producer, RefreshHandle, Subscription, SyncError, SyncState, SyncStatus,
    Synchronizer,
};
pub use visibility::{VisibilityHandle, VisibilityMonitor};
