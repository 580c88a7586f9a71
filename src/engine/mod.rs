//! Timer controller: one instance per UI surface.
//!
//! The controller's phase is the single source of truth for which periodic task may run.
//! Exactly one slot holds either the elapsed ticker or the countdown, so the two can never
//! be active together.

use crate::api::TimeEntryApi;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::duration::format_hms;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{Actor, TimeEntry, TrackingType};
use crate::sync::SyncManager;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};

mod control;
mod countdown;
mod manual;
mod reconcile;
mod tick;
pub mod ticker;

pub use countdown::{CountdownSession, CountdownStep};
pub use manual::{resolve_manual_entry, ManualEntryDraft, ResolvedEntry};
pub use ticker::{TaskKind, TickFlow, Ticker};

/// Controller phase. `Starting`/`Stopping`/`Completing` mean a network call is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
    Counting,
    Completing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Counting => "counting down",
            Phase::Completing => "saving",
        }
    }
}

/// Fields the user edits on the tracker surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerForm {
    pub project: String,
    pub task: String,
    pub description: String,
    pub billable: bool,
    pub tracking_type: TrackingType,
    /// Manual entry bounds, local wall-clock (`YYYY-MM-DDTHH:MM`)
    pub manual_start: String,
    pub manual_end: String,
}

impl TimerForm {
    pub fn manual_draft(&self) -> ManualEntryDraft {
        ManualEntryDraft {
            start: self.manual_start.clone(),
            end: self.manual_end.clone(),
            project: self.project.clone(),
            task: self.task.clone(),
            description: self.description.clone(),
            billable: self.billable,
            tracking_type: self.tracking_type,
        }
    }

    /// Back to blanks. Tracking type is a preference and survives.
    pub fn clear(&mut self) {
        *self = Self {
            tracking_type: self.tracking_type,
            ..Self::default()
        };
    }
}

/// Client-owned view of the server's in-progress record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSession {
    pub id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// What the UI renders, republished on every change and every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub phase: Phase,
    pub timer_id: Option<String>,
    pub started_at: Option<String>,
    pub elapsed_seconds: u64,
    pub remaining_seconds: Option<u64>,
    /// Final duration of the last stop, shown during the grace window
    pub last_duration: Option<u64>,
    pub processing: bool,
    /// `HH:MM:SS` of whatever the surface is counting
    pub display: String,
}

impl Default for TrackerSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            timer_id: None,
            started_at: None,
            elapsed_seconds: 0,
            remaining_seconds: None,
            last_duration: None,
            processing: false,
            display: format_hms(0),
        }
    }
}

/// Notifications for the user / collaborator layer
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    TimerStarted { timer_id: String },
    TimerStopped { entry: TimeEntry, duration: u64 },
    /// Local state believed a timer was running, the server has none
    OrphanCleared,
    CountdownArmed { duration: u64 },
    CountdownCancelled,
    EntryCreated(TimeEntry),
    /// Save failed, payload kept in the local retry queue
    EntryQueued { queue_id: i64 },
    Error(String),
}

pub(crate) struct TrackerState {
    pub(crate) phase: Phase,
    pub(crate) form: TimerForm,
    pub(crate) session: Option<TimerSession>,
    pub(crate) countdown: Option<CountdownSession>,
    pub(crate) elapsed_seconds: u64,
    pub(crate) last_duration: Option<u64>,
    /// The one periodic-task slot (elapsed ticker or countdown)
    pub(crate) task: Option<Ticker>,
    pub(crate) grace_reset: Option<Ticker>,
    /// Bumped on every local timer transition; stale poll results compare against it
    pub(crate) epoch: u64,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            form: TimerForm::default(),
            session: None,
            countdown: None,
            elapsed_seconds: 0,
            last_duration: None,
            task: None,
            grace_reset: None,
            epoch: 0,
        }
    }

    fn snapshot(&self, processing: bool) -> TrackerSnapshot {
        let remaining_seconds = self.countdown.as_ref().map(|c| c.remaining_seconds());
        let shown = match self.phase {
            Phase::Counting | Phase::Completing => remaining_seconds.unwrap_or(0),
            _ => self.elapsed_seconds,
        };
        TrackerSnapshot {
            phase: self.phase,
            timer_id: self.session.as_ref().and_then(|s| s.id.clone()),
            started_at: self
                .session
                .as_ref()
                .map(|s| s.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            elapsed_seconds: self.elapsed_seconds,
            remaining_seconds,
            last_duration: self.last_duration,
            processing,
            display: format_hms(shown),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) api: Arc<dyn TimeEntryApi>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) actor: Actor,
    pub(crate) config: TrackerConfig,
    pub(crate) sync: Option<Arc<SyncManager>>,
    pub(crate) state: Mutex<TrackerState>,
    /// Re-entrancy guard for Start/Stop
    pub(crate) processing: AtomicBool,
    pub(crate) snapshot_tx: watch::Sender<TrackerSnapshot>,
    pub(crate) events_tx: broadcast::Sender<TrackerEvent>,
    pub(crate) poller: Mutex<Option<Ticker>>,
}

/// Start/stop, reconciliation and manual-entry countdown for one tracker surface
#[derive(Clone)]
pub struct TrackerController {
    pub(crate) inner: Arc<Inner>,
}

pub struct TrackerControllerBuilder {
    api: Arc<dyn TimeEntryApi>,
    actor: Actor,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    sync: Option<Arc<SyncManager>>,
}

impl TrackerControllerBuilder {
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables the unsaved-entry retry queue for failed countdown saves
    pub fn sync_manager(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn build(self) -> TrackerController {
        let (snapshot_tx, _) = watch::channel(TrackerSnapshot::default());
        let (events_tx, _) = broadcast::channel(64);
        TrackerController {
            inner: Arc::new(Inner {
                api: self.api,
                clock: self.clock,
                actor: self.actor,
                config: self.config,
                sync: self.sync,
                state: Mutex::new(TrackerState::new()),
                processing: AtomicBool::new(false),
                snapshot_tx,
                events_tx,
                poller: Mutex::new(None),
            }),
        }
    }
}

impl TrackerController {
    pub fn builder(api: Arc<dyn TimeEntryApi>, actor: Actor) -> TrackerControllerBuilder {
        TrackerControllerBuilder {
            api,
            actor,
            config: TrackerConfig::default(),
            clock: Arc::new(SystemClock),
            sync: None,
        }
    }

    pub fn new(api: Arc<dyn TimeEntryApi>, actor: Actor, config: TrackerConfig) -> Self {
        Self::builder(api, actor).config(config).build()
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn lock_state(&self) -> TrackerResult<MutexGuard<'_, TrackerState>> {
        self.inner.state.lock().map_err(|_| TrackerError::Poisoned)
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, state: &TrackerState) {
        self.inner
            .snapshot_tx
            .send_replace(state.snapshot(self.is_processing()));
    }

    pub(crate) fn publish_current(&self) {
        if let Ok(state) = self.inner.state.lock() {
            self.publish(&state);
        }
    }

    pub(crate) fn emit(&self, event: TrackerEvent) {
        // No receivers is fine
        let _ = self.inner.events_tx.send(event);
    }

    pub fn actor(&self) -> &Actor {
        &self.inner.actor
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn form(&self) -> TrackerResult<TimerForm> {
        Ok(self.lock_state()?.form.clone())
    }

    pub fn set_form(&self, form: TimerForm) -> TrackerResult<()> {
        self.lock_state()?.form = form;
        Ok(())
    }

    pub fn update_form<F>(&self, update: F) -> TrackerResult<()>
    where
        F: FnOnce(&mut TimerForm),
    {
        update(&mut self.lock_state()?.form);
        Ok(())
    }

    /// Unmount: cancel every periodic task owned by this surface.
    /// A running server timer is left alone; the next reconciliation picks it up again.
    pub fn shutdown(&self) -> TrackerResult<()> {
        {
            let mut state = self.lock_state()?;
            state.task = None;
            state.grace_reset = None;
            if state.phase == Phase::Counting {
                state.countdown = None;
                state.phase = Phase::Idle;
            }
            self.publish(&state);
        }
        if let Ok(mut poller) = self.inner.poller.lock() {
            *poller = None;
        }
        tracing::info!("[TIMER] Controller shut down, periodic tasks cancelled");
        Ok(())
    }
}
