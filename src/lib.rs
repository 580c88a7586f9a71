//! Timer reconciliation and duration accounting for the timesheet client.
//!
//! The UI drives a [`TrackerController`]; the server stays the source of truth for the
//! running timer, this crate keeps the displayed elapsed time honest against it.

mod api;
mod clock;
mod config;
mod database;
mod duration;
mod engine;
mod error;
mod models;
mod sync;


pub use api::{HttpTimeEntryApi, TimeEntryApi};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::TrackerConfig;
pub use database::{Database, PendingEntry};
pub use duration::{
    elapsed_seconds, elapsed_seconds_ms, format_hms, normalize_duration, parse_local_datetime,
    parse_server_timestamp,
};
pub use engine::{
    resolve_manual_entry, CountdownSession, CountdownStep, ManualEntryDraft, Phase,
    ResolvedEntry, TaskKind, TickFlow, Ticker, TimerForm, TimerSession, TrackerController,
    TrackerControllerBuilder, TrackerEvent, TrackerSnapshot,
};
pub use error::{TrackerError, TrackerResult, ValidationError};
pub use models::{
    ActiveTimer, Actor, ApiEnvelope, CreateTimeEntryRequest, FailedEntryInfo, QueueStats,
    StartTimerRequest, TimeEntry, TrackingType, DEFAULT_USER_TYPE,
};
pub use sync::SyncManager;

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` level.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
