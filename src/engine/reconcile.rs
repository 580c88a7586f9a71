use crate::duration::{elapsed_seconds, parse_server_timestamp};
use crate::engine::{
    Phase, TaskKind, TickFlow, Ticker, TimerSession, TrackerController, TrackerEvent, TrackerState,
};
use crate::error::TrackerResult;
use crate::models::ActiveTimer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl TrackerController {
    /// Overwrite local elapsed time with server truth.
    ///
    /// * record present → elapsed recomputed from its `startTime`, ticker ensured (never restarted)
    /// * no record while locally running → orphaned session, cleared
    ///
    /// Ignored while a Start/Stop is in flight or while a manual countdown owns the surface.
    pub fn reconcile(&self, active: Option<&ActiveTimer>) -> TrackerResult<()> {
        let mut state = self.lock_state()?;
        self.reconcile_locked(&mut state, active)
    }

    /// Like `reconcile`, but drops the result if a local transition happened after `epoch`
    /// was read. Used for results of fetches that may have raced a Start/Stop.
    pub(crate) fn reconcile_at_epoch(
        &self,
        epoch: u64,
        active: Option<&ActiveTimer>,
    ) -> TrackerResult<()> {
        let mut state = self.lock_state()?;
        if state.epoch != epoch {
            debug!(
                "[RECONCILE] Stale active-timer result (epoch {} != {}), skipping",
                epoch, state.epoch
            );
            return Ok(());
        }
        self.reconcile_locked(&mut state, active)
    }

    fn reconcile_locked(
        &self,
        state: &mut TrackerState,
        active: Option<&ActiveTimer>,
    ) -> TrackerResult<()> {
        match state.phase {
            Phase::Starting | Phase::Stopping | Phase::Counting | Phase::Completing => {
                debug!(
                    "[RECONCILE] Skipping while {}",
                    state.phase.as_str()
                );
                return Ok(());
            }
            Phase::Idle | Phase::Running => {}
        }

        match active {
            Some(record) => {
                let Some(started_at) = parse_server_timestamp(&record.start_time) else {
                    warn!(
                        "[RECONCILE] Active timer {} has unparseable startTime {:?}, ignoring",
                        record.id, record.start_time
                    );
                    return Ok(());
                };
                self.adopt_active_timer(state, record.id.clone(), started_at)?;
            }
            None if state.phase == Phase::Running => {
                info!("[RECONCILE] No active timer on server, clearing orphaned session");
                state.phase = Phase::Idle;
                state.session = None;
                state.elapsed_seconds = 0;
                state.epoch += 1;
                self.stop_ticking(state);
                self.emit(TrackerEvent::OrphanCleared);
            }
            None => {}
        }

        self.publish(state);
        Ok(())
    }

    /// Take `id`/`started_at` as authoritative and move to Running
    pub(crate) fn adopt_active_timer(
        &self,
        state: &mut TrackerState,
        id: String,
        started_at: DateTime<Utc>,
    ) -> TrackerResult<()> {
        // Server start in the future means clock skew; show zero rather than wrap
        let elapsed = elapsed_seconds(started_at, self.inner.clock.now());
        if state.phase != Phase::Running {
            info!("[RECONCILE] Adopting active timer {} ({}s elapsed)", id, elapsed);
        }
        state.session = Some(TimerSession {
            id: Some(id),
            started_at,
        });
        state.elapsed_seconds = elapsed;
        state.last_duration = None;
        state.grace_reset = None;
        state.phase = Phase::Running;
        self.ensure_ticking(state)
    }

    /// Periodically fetch the active timer and reconcile against it.
    /// Replaces any previous poller; cancelled by `shutdown`.
    pub fn spawn_active_timer_poller(&self) -> TrackerResult<()> {
        let weak = Arc::downgrade(&self.inner);
        let ticker = Ticker::spawn(
            TaskKind::ActiveTimerPoll,
            self.inner.config.active_timer_poll_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return TickFlow::Break;
                    };
                    TrackerController::from_inner(inner).poll_active_timer().await;
                    TickFlow::Continue
                }
            },
        )?;

        let mut poller = self
            .inner
            .poller
            .lock()
            .map_err(|_| crate::error::TrackerError::Poisoned)?;
        *poller = Some(ticker);
        info!(
            "[RECONCILE] Active timer poller started ({:?})",
            self.inner.config.active_timer_poll_interval
        );
        Ok(())
    }

    /// One poll: fetch, then reconcile if nothing changed locally meanwhile.
    /// Fetch failures change nothing.
    pub async fn poll_active_timer(&self) {
        let epoch = match self.lock_state() {
            Ok(state) => state.epoch,
            Err(e) => {
                warn!("[RECONCILE] Poll skipped: {}", e);
                return;
            }
        };
        match self
            .inner
            .api
            .fetch_active_timer(&self.inner.actor.user_id)
            .await
        {
            Ok(active) => {
                if let Err(e) = self.reconcile_at_epoch(epoch, active.as_ref()) {
                    warn!("[RECONCILE] Failed to apply active timer: {}", e);
                }
            }
            Err(e) => {
                warn!("[RECONCILE] Failed to fetch active timer: {}", e);
            }
        }
    }
}
