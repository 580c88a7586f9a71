use crate::engine::{Phase, TaskKind, TickFlow, Ticker, TrackerController, TrackerState};
use crate::error::TrackerResult;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl TrackerController {
    /// Local 1 Hz counter. No-op when already ticking so the phase of the second is kept.
    pub(crate) fn ensure_ticking(&self, state: &mut TrackerState) -> TrackerResult<()> {
        if let Some(task) = &state.task {
            match task.kind() {
                TaskKind::Elapsed if !task.is_finished() => return Ok(()),
                TaskKind::Elapsed => {}
                other => {
                    warn!("[TIMER] Replacing {:?} task with elapsed ticker", other);
                }
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let ticker = Ticker::spawn(TaskKind::Elapsed, self.inner.config.tick_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => TrackerController::from_inner(inner).on_elapsed_tick(),
                    None => TickFlow::Break,
                }
            }
        })?;
        debug!("[TIMER] Elapsed ticker started");
        state.task = Some(ticker);
        Ok(())
    }

    /// Safe to call when not ticking
    pub(crate) fn stop_ticking(&self, state: &mut TrackerState) {
        if matches!(state.task.as_ref().map(|t| t.kind()), Some(TaskKind::Elapsed)) {
            state.task = None;
            debug!("[TIMER] Elapsed ticker stopped");
        }
    }

    fn on_elapsed_tick(&self) -> TickFlow {
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => {
                error!("[TIMER] Elapsed tick aborted: {}", e);
                return TickFlow::Break;
            }
        };
        if state.phase != Phase::Running {
            return TickFlow::Break;
        }
        state.elapsed_seconds = state.elapsed_seconds.saturating_add(1);
        self.publish(&state);
        TickFlow::Continue
    }
}
