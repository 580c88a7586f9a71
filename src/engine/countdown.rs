use crate::engine::{
    resolve_manual_entry, ManualEntryDraft, Phase, TaskKind, TickFlow, Ticker, TrackerController,
    TrackerEvent,
};
use crate::error::{TrackerError, TrackerResult};
use crate::models::CreateTimeEntryRequest;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one countdown tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownStep {
    Continue { remaining: u64 },
    /// Handed out exactly once per armed session
    Complete(CreateTimeEntryRequest),
    /// Already completed; further ticks are no-ops
    Spent,
}

/// Armed manual entry counting down to its autosave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownSession {
    remaining_seconds: u64,
    duration: u64,
    payload: Option<CreateTimeEntryRequest>,
}

impl CountdownSession {
    pub fn arm(duration: u64, payload: CreateTimeEntryRequest) -> Self {
        Self {
            remaining_seconds: duration,
            duration,
            payload: Some(payload),
        }
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn is_spent(&self) -> bool {
        self.payload.is_none()
    }

    /// Decrement; at one second left the next tick completes (clamped at 0, never negative)
    pub fn tick(&mut self) -> CountdownStep {
        if self.payload.is_none() {
            return CountdownStep::Spent;
        }
        if self.remaining_seconds <= 1 {
            self.remaining_seconds = 0;
            return match self.payload.take() {
                Some(payload) => CountdownStep::Complete(payload),
                None => CountdownStep::Spent,
            };
        }
        self.remaining_seconds -= 1;
        CountdownStep::Continue {
            remaining: self.remaining_seconds,
        }
    }
}

impl TrackerController {
    /// Validate the form's manual fields and arm the countdown autosave
    pub fn save_manual_entry(&self) -> TrackerResult<u64> {
        let draft = self.lock_state()?.form.manual_draft();
        self.arm_manual_entry(&draft)
    }

    /// Validate `draft` and arm the countdown. Nothing is persisted until it reaches zero.
    /// Returns the countdown length in seconds.
    pub fn arm_manual_entry(&self, draft: &ManualEntryDraft) -> TrackerResult<u64> {
        let mut state = self.lock_state()?;
        if state.phase != Phase::Idle {
            warn!(
                "[FSM] Invalid transition: {} → Counting",
                state.phase.as_str()
            );
            return Err(TrackerError::InvalidTransition {
                from: state.phase.as_str(),
                action: "save a manual entry",
            });
        }
        let resolved = resolve_manual_entry(draft, &self.inner.actor)?;

        let weak = Arc::downgrade(&self.inner);
        let ticker = Ticker::spawn(TaskKind::Countdown, self.inner.config.tick_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => TrackerController::from_inner(inner).on_countdown_tick(),
                    None => TickFlow::Break,
                }
            }
        })?;

        state.grace_reset = None;
        state.last_duration = None;
        state.elapsed_seconds = 0;
        state.epoch += 1;
        state.countdown = Some(CountdownSession::arm(resolved.duration, resolved.payload));
        state.phase = Phase::Counting;
        state.task = Some(ticker);
        self.publish(&state);

        info!(
            "[COUNTDOWN] Manual entry armed, saving in {}s",
            resolved.duration
        );
        self.emit(TrackerEvent::CountdownArmed {
            duration: resolved.duration,
        });
        Ok(resolved.duration)
    }

    /// Drop an armed countdown without saving. `Ok(false)` when nothing was armed.
    pub fn cancel_countdown(&self) -> TrackerResult<bool> {
        let mut state = self.lock_state()?;
        match state.phase {
            Phase::Counting => {
                state.task = None;
                state.countdown = None;
                state.phase = Phase::Idle;
                self.publish(&state);
                info!("[COUNTDOWN] Countdown cancelled, entry discarded");
                self.emit(TrackerEvent::CountdownCancelled);
                Ok(true)
            }
            Phase::Completing => Err(TrackerError::InvalidTransition {
                from: state.phase.as_str(),
                action: "cancel the countdown",
            }),
            _ => Ok(false),
        }
    }

    fn on_countdown_tick(&self) -> TickFlow {
        let payload = {
            let mut state = match self.lock_state() {
                Ok(state) => state,
                Err(e) => {
                    error!("[COUNTDOWN] Tick aborted: {}", e);
                    return TickFlow::Break;
                }
            };
            if state.phase != Phase::Counting {
                return TickFlow::Break;
            }
            let step = match state.countdown.as_mut() {
                Some(countdown) => countdown.tick(),
                None => return TickFlow::Break,
            };
            match step {
                CountdownStep::Continue { .. } => {
                    self.publish(&state);
                    return TickFlow::Continue;
                }
                CountdownStep::Spent => return TickFlow::Break,
                CountdownStep::Complete(payload) => {
                    // Completing before releasing the lock: no later tick can fire again
                    state.phase = Phase::Completing;
                    state.task = None;
                    self.publish(&state);
                    payload
                }
            }
        };

        debug!("[COUNTDOWN] Countdown reached zero, saving manual entry");
        let controller = self.clone();
        tokio::spawn(async move {
            controller.complete_countdown(payload).await;
        });
        TickFlow::Break
    }

    /// Persist the armed payload once, then return to Idle whatever the outcome
    async fn complete_countdown(&self, payload: CreateTimeEntryRequest) {
        let key = payload.idempotency_key();
        let result = self
            .inner
            .api
            .create_time_entry(&payload, Some(&key))
            .await;

        match result {
            Ok(entry) => {
                if let Ok(mut state) = self.lock_state() {
                    state.phase = Phase::Idle;
                    state.countdown = None;
                    state.form.clear();
                    state.elapsed_seconds = 0;
                    self.publish(&state);
                }
                info!(
                    "[COUNTDOWN] Manual entry saved ({}s)",
                    payload.duration
                );
                self.emit(TrackerEvent::EntryCreated(entry));
            }
            Err(e) => {
                error!("[COUNTDOWN] Failed to save manual entry: {}", e);
                self.emit(TrackerEvent::Error(format!(
                    "Failed to save manual entry: {}",
                    e
                )));
                match &self.inner.sync {
                    Some(sync) => match sync.enqueue_entry(&payload) {
                        Ok(queue_id) => {
                            self.emit(TrackerEvent::EntryQueued { queue_id });
                        }
                        Err(qe) => {
                            error!("[COUNTDOWN] Could not queue unsaved entry: {}", qe);
                        }
                    },
                    None => {
                        warn!("[COUNTDOWN] No retry queue configured, manual entry discarded");
                    }
                }
                if let Ok(mut state) = self.lock_state() {
                    state.phase = Phase::Idle;
                    state.countdown = None;
                    self.publish(&state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackingType;

    fn payload(duration: u64) -> CreateTimeEntryRequest {
        CreateTimeEntryRequest {
            user_id: "u1".into(),
            project: "p".into(),
            task: "t".into(),
            description: String::new(),
            start_time: "2024-01-01T10:00:00.000Z".into(),
            end_time: "2024-01-01T10:00:02.000Z".into(),
            duration,
            billable: false,
            tracking_type: TrackingType::Hourly,
            is_manual_entry: true,
            user_type: "TeamMember".into(),
        }
    }

    #[test]
    fn test_two_second_countdown_completes_on_second_tick() {
        let mut session = CountdownSession::arm(2, payload(2));
        assert_eq!(session.remaining_seconds(), 2);
        assert_eq!(session.tick(), CountdownStep::Continue { remaining: 1 });
        assert!(matches!(session.tick(), CountdownStep::Complete(_)));
        assert_eq!(session.remaining_seconds(), 0);
        assert!(session.is_spent());
    }

    #[test]
    fn test_completes_exactly_once_under_rapid_ticks() {
        let mut session = CountdownSession::arm(2, payload(2));
        let completions = (0..10)
            .map(|_| session.tick())
            .filter(|step| matches!(step, CountdownStep::Complete(_)))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(session.remaining_seconds(), 0);
    }

    #[test]
    fn test_zero_duration_completes_on_first_tick() {
        let mut session = CountdownSession::arm(0, payload(0));
        assert!(matches!(session.tick(), CountdownStep::Complete(_)));
        assert_eq!(session.tick(), CountdownStep::Spent);
    }
}
