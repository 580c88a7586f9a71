use crate::error::{TrackerError, TrackerResult};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// What a tick callback wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Break,
}

/// Which periodic job occupies a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Elapsed,
    Countdown,
    GraceReset,
    ActiveTimerPoll,
    QueueSync,
}

/// Cancelable background task. Aborted when dropped, so ownership of the handle
/// is the lifetime of the job.
#[derive(Debug)]
pub struct Ticker {
    kind: TaskKind,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Run `on_tick` every `period`. First tick fires one period after spawn.
    /// Late ticks are skipped rather than bursted.
    pub fn spawn<F, Fut>(kind: TaskKind, period: Duration, mut on_tick: F) -> TrackerResult<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let runtime = current_runtime()?;
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if on_tick().await == TickFlow::Break {
                    break;
                }
            }
            debug!("[TICKER] {:?} task finished", kind);
        });
        Ok(Self { kind, handle })
    }

    /// Run `job` once after `delay`
    pub fn after<Fut>(kind: TaskKind, delay: Duration, job: Fut) -> TrackerResult<Self>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = current_runtime()?;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        Ok(Self { kind, handle })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn current_runtime() -> TrackerResult<Handle> {
    Handle::try_current().map_err(|e| TrackerError::Runtime(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_once_per_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _ticker = Ticker::spawn(TaskKind::Elapsed, Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                TickFlow::Continue
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_on_break_and_on_drop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let ticker = Ticker::spawn(TaskKind::Countdown, Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                    TickFlow::Break
                } else {
                    TickFlow::Continue
                }
            }
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(ticker.is_finished());

        let c = count.clone();
        let dropped = Ticker::spawn(TaskKind::Elapsed, Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(100, Ordering::SeqCst);
                TickFlow::Continue
            }
        })
        .unwrap();
        drop(dropped);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spawn_outside_runtime_is_an_error() {
        let result = Ticker::spawn(TaskKind::Elapsed, Duration::from_secs(1), || async {
            TickFlow::Continue
        });
        assert!(matches!(result, Err(TrackerError::Runtime(_))));
    }
}
