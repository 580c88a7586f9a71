use crate::duration::parse_server_timestamp;
use crate::engine::{Phase, TaskKind, Ticker, TrackerController, TrackerEvent, TrackerState};
use crate::error::{TrackerError, TrackerResult, ValidationError};
use crate::models::{Actor, StartTimerRequest};
use scopeguard::guard;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl crate::engine::TimerForm {
    /// Start request from the form; project and task are required
    pub fn start_request(&self, actor: &Actor) -> Result<StartTimerRequest, ValidationError> {
        if self.project.trim().is_empty() {
            return Err(ValidationError::MissingProject);
        }
        if self.task.trim().is_empty() {
            return Err(ValidationError::MissingTask);
        }
        Ok(StartTimerRequest {
            user_id: actor.user_id.clone(),
            project: self.project.clone(),
            task: self.task.clone(),
            description: self.description.clone(),
            tracking_type: self.tracking_type,
            user_type: actor.user_type().to_string(),
        })
    }
}

impl TrackerController {
    /// Claim the Processing flag. A second Start/Stop while one is in flight is ignored.
    fn try_begin_processing(&self) -> TrackerResult<()> {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[TIMER] Operation already in progress, ignoring click");
            return Err(TrackerError::Busy);
        }
        Ok(())
    }

    /// Idle → Starting → Running.
    /// On failure the controller stays Idle and the error is surfaced.
    pub async fn start(&self) -> TrackerResult<()> {
        self.try_begin_processing()?;
        // Processing is always cleared, whatever path we leave by
        let _guard = guard((), |_| {
            self.inner.processing.store(false, Ordering::Release);
            self.publish_current();
        });

        let request = {
            let mut state = self.lock_state()?;
            if state.phase != Phase::Idle {
                warn!(
                    "[FSM] Invalid transition: {} → Starting",
                    state.phase.as_str()
                );
                return Err(TrackerError::InvalidTransition {
                    from: state.phase.as_str(),
                    action: "start the timer",
                });
            }
            let request = state.form.start_request(&self.inner.actor)?;
            state.phase = Phase::Starting;
            state.grace_reset = None;
            state.last_duration = None;
            state.elapsed_seconds = 0;
            self.publish(&state);
            request
        };

        info!(
            "[TIMER] Starting timer: project={} task={}",
            request.project, request.task
        );
        let result = self.inner.api.start_timer(&request).await;

        let mut state = self.lock_state()?;
        let outcome = result.and_then(|entry| {
            let id = entry
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| TrackerError::Decode("Start response has no timer id".into()))?;
            // Client time only stands in until the server reports its own start
            let started_at = entry
                .start_time
                .as_deref()
                .and_then(parse_server_timestamp)
                .unwrap_or_else(|| self.inner.clock.now());
            Ok((id, started_at))
        });

        match outcome {
            Ok((id, started_at)) => {
                state.epoch += 1;
                if let Err(e) = self.adopt_active_timer(&mut state, id.clone(), started_at) {
                    // Server timer exists but we cannot tick; keep it as Running so Stop still works
                    error!("[TIMER] Timer {} started but ticker failed: {}", id, e);
                }
                self.publish(&state);
                info!("[TIMER] Timer {} running", id);
                self.emit(TrackerEvent::TimerStarted { timer_id: id });
                Ok(())
            }
            Err(e) => {
                state.phase = Phase::Idle;
                state.session = None;
                self.publish(&state);
                error!("[TIMER] Failed to start timer: {}", e);
                self.emit(TrackerEvent::Error(format!("Failed to start timer: {}", e)));
                Err(e)
            }
        }
    }

    /// Running → Stopping → Idle. Returns the final duration in seconds.
    ///
    /// Any failure still resets local running state: the UI never keeps showing a timer
    /// the server may disagree about.
    pub async fn stop(&self) -> TrackerResult<u64> {
        self.try_begin_processing()?;
        let _guard = guard((), |_| {
            self.inner.processing.store(false, Ordering::Release);
            self.publish_current();
        });

        let (timer_id, local_elapsed) = {
            let mut state = self.lock_state()?;
            if state.phase != Phase::Running {
                warn!(
                    "[FSM] Invalid transition: {} → Stopping",
                    state.phase.as_str()
                );
                return Err(TrackerError::InvalidTransition {
                    from: state.phase.as_str(),
                    action: "stop the timer",
                });
            }
            let Some(timer_id) = state.session.as_ref().and_then(|s| s.id.clone()) else {
                return Err(TrackerError::NoActiveTimer);
            };
            state.phase = Phase::Stopping;
            self.stop_ticking(&mut state);
            self.publish(&state);
            (timer_id, state.elapsed_seconds)
        };

        info!("[TIMER] Stopping timer {}", timer_id);
        let result = self.inner.api.stop_timer(&timer_id).await;

        let mut state = self.lock_state()?;
        state.epoch += 1;
        state.phase = Phase::Idle;
        state.session = None;

        match result {
            Ok(entry) => {
                let duration = entry.resolved_duration().unwrap_or_else(|| {
                    warn!(
                        "[TIMER] Stop response for {} has no duration or timestamps, using local {}s",
                        timer_id, local_elapsed
                    );
                    local_elapsed
                });
                state.elapsed_seconds = duration;
                state.last_duration = Some(duration);
                self.schedule_grace_reset(&mut state);
                self.publish(&state);
                info!("[TIMER] Timer {} stopped after {}s", timer_id, duration);
                self.emit(TrackerEvent::TimerStopped { entry, duration });
                Ok(duration)
            }
            Err(e) => {
                state.elapsed_seconds = 0;
                state.last_duration = None;
                self.publish(&state);
                error!(
                    "[TIMER] Failed to stop timer {}: {}. Local state reset anyway.",
                    timer_id, e
                );
                self.emit(TrackerEvent::Error(format!("Failed to stop timer: {}", e)));
                Err(e)
            }
        }
    }

    /// Keep the final duration on screen for the grace window, then blank the form.
    /// Falls back to an immediate reset when no task can be scheduled.
    fn schedule_grace_reset(&self, state: &mut TrackerState) {
        let weak = Arc::downgrade(&self.inner);
        let scheduled = Ticker::after(
            TaskKind::GraceReset,
            self.inner.config.stop_grace_period,
            async move {
                if let Some(inner) = weak.upgrade() {
                    TrackerController::from_inner(inner).finish_grace_reset();
                }
            },
        );
        match scheduled {
            Ok(task) => state.grace_reset = Some(task),
            Err(e) => {
                warn!("[TIMER] Grace reset not scheduled ({}), resetting now", e);
                reset_after_stop(state);
            }
        }
    }

    fn finish_grace_reset(&self) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        if state.phase != Phase::Idle {
            return;
        }
        reset_after_stop(&mut state);
        // This task is finishing; dropping its own handle is a no-op abort
        state.grace_reset = None;
        self.publish(&state);
        debug!("[TIMER] Grace window over, form reset");
    }
}

fn reset_after_stop(state: &mut TrackerState) {
    state.form.clear();
    state.elapsed_seconds = 0;
    state.last_duration = None;
}
