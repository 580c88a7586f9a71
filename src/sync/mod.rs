//! Retry queue for manual entries whose countdown completed but whose save failed.
//! Single-flight: one replay run at a time, DB lock held only around DB calls.

use crate::api::TimeEntryApi;
use crate::config::TrackerConfig;
use crate::database::{Database, PendingEntry};
use crate::engine::{TaskKind, TickFlow, Ticker};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{CreateTimeEntryRequest, FailedEntryInfo, QueueStats};
use scopeguard::guard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of replaying one queued entry
#[derive(Debug)]
enum ReplayOutcome {
    Sent,
    Retry(String),
    /// Will never succeed as-is (bad payload, 4xx)
    Reject(String),
}

pub struct SyncManager {
    db: Arc<Database>,
    api: Arc<dyn TimeEntryApi>,
    is_syncing: AtomicBool,
    max_retries: i32,
    sync_interval: Duration,
}

impl SyncManager {
    pub fn new(db: Arc<Database>, api: Arc<dyn TimeEntryApi>, config: &TrackerConfig) -> Self {
        Self {
            db,
            api,
            is_syncing: AtomicBool::new(false),
            max_retries: config.max_sync_retries,
            sync_interval: config.sync_interval,
        }
    }

    /// Adaptive batch size for one run
    fn calculate_batch_size(pending_count: i32) -> i32 {
        match pending_count {
            0..=20 => 5,
            21..=100 => 20,
            101..=500 => 50,
            _ => 100,
        }
    }

    pub fn enqueue_entry(&self, entry: &CreateTimeEntryRequest) -> TrackerResult<i64> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| TrackerError::Decode(format!("Failed to serialize entry: {}", e)))?;
        let id = self.db.enqueue_entry(&payload, &entry.idempotency_key())?;
        Ok(id)
    }

    /// Replay due entries. Returns how many were sent; 0 when another run is in progress.
    pub async fn sync_queue(&self) -> TrackerResult<usize> {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[SYNC] Another sync already in progress, skipping");
            return Ok(0);
        }

        let _guard = guard((), |_| {
            self.is_syncing.store(false, Ordering::Release);
        });

        self.run_sync_internal().await
    }

    async fn run_sync_internal(&self) -> TrackerResult<usize> {
        let pending_count = self.db.get_pending_count()?;
        if pending_count == 0 {
            debug!("[SYNC] No pending entries, skipping sync");
            self.touch_last_sync();
            return Ok(0);
        }

        let batch_size = Self::calculate_batch_size(pending_count);
        let entries = self.db.get_retry_entries(self.max_retries, batch_size)?;
        if entries.is_empty() {
            debug!("[SYNC] No entries ready for retry (backoff), skipping");
            self.touch_last_sync();
            return Ok(0);
        }

        info!(
            "[SYNC] Starting sync: {} pending entries, batch size: {}",
            pending_count, batch_size
        );

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        self.db.claim_entries(&ids)?;

        let mut synced_count = 0;
        let mut failed_in_batch = 0;

        // Network I/O outside any DB lock
        for entry in entries {
            match self.replay(&entry).await {
                ReplayOutcome::Sent => {
                    if self.mark_sent_with_retry(entry.id).await {
                        synced_count += 1;
                    }
                }
                ReplayOutcome::Retry(message) => {
                    failed_in_batch += 1;
                    let new_retry_count = entry.retry_count + 1;
                    let status = if new_retry_count >= self.max_retries {
                        warn!(
                            "[SYNC] Entry {} failed after {} retries: {}",
                            entry.id, new_retry_count, message
                        );
                        "failed"
                    } else {
                        info!(
                            "[SYNC] Entry {} will retry later (attempt {}): {}",
                            entry.id, new_retry_count, message
                        );
                        "pending"
                    };
                    self.record_failure(entry.id, status, new_retry_count, &message);
                }
                ReplayOutcome::Reject(message) => {
                    failed_in_batch += 1;
                    warn!("[SYNC] Entry {} rejected: {}", entry.id, message);
                    self.record_failure(entry.id, "failed", entry.retry_count + 1, &message);
                }
            }
        }

        self.touch_last_sync();
        info!(
            "[SYNC] Sync completed: {} synced, {} failed",
            synced_count, failed_in_batch
        );
        Ok(synced_count)
    }

    async fn replay(&self, entry: &PendingEntry) -> ReplayOutcome {
        let request: CreateTimeEntryRequest = match serde_json::from_str(&entry.payload) {
            Ok(request) => request,
            Err(e) => return ReplayOutcome::Reject(format!("Parse payload: {}", e)),
        };
        let key = entry
            .idempotency_key
            .clone()
            .unwrap_or_else(|| request.idempotency_key());

        match self.api.create_time_entry(&request, Some(&key)).await {
            Ok(_) => ReplayOutcome::Sent,
            Err(e) if e.is_retryable() => ReplayOutcome::Retry(e.to_string()),
            Err(e) => ReplayOutcome::Reject(e.to_string()),
        }
    }

    /// The server has the entry; keep trying to record that locally.
    /// A row left pending here is replayed later and deduplicated by its idempotency key.
    async fn mark_sent_with_retry(&self, id: i64) -> bool {
        const MAX_ATTEMPTS: u32 = 3;
        let mut attempts = 0;
        loop {
            match self.db.mark_entry_sent(id) {
                Ok(()) => return true,
                Err(e) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        error!(
                            "[SYNC] Failed to mark entry {} sent after {} attempts: {}. It will be replayed.",
                            id, MAX_ATTEMPTS, e
                        );
                        return false;
                    }
                    // 100ms, 200ms
                    let delay_ms = 100 * (1u64 << (attempts - 1));
                    warn!(
                        "[SYNC] Failed to mark entry {} sent (attempt {}): {}. Retrying in {}ms...",
                        id, attempts, e, delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// A row whose status cannot be written keeps its claim and is picked up after the backoff;
    /// the rest of the batch still goes out.
    fn record_failure(&self, id: i64, status: &str, retry_count: i32, message: &str) {
        if let Err(e) =
            self.db
                .update_entry_status_with_error(id, status, retry_count, Some(message))
        {
            error!(
                "[SYNC] Failed to record {} for entry {}: {}",
                status, id, e
            );
        }
    }

    fn touch_last_sync(&self) {
        if let Err(e) = self
            .db
            .set_app_meta("last_sync_at", &chrono::Utc::now().timestamp().to_string())
        {
            warn!("[SYNC] Failed to update last_sync_at: {}", e);
        }
    }

    /// Replay the queue every `sync_interval` until the returned ticker is dropped
    pub fn spawn_periodic_sync(self: &Arc<Self>) -> TrackerResult<Ticker> {
        let weak = Arc::downgrade(self);
        let ticker = Ticker::spawn(TaskKind::QueueSync, self.sync_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(sync) = weak.upgrade() else {
                    return TickFlow::Break;
                };
                if let Err(e) = sync.sync_queue().await {
                    warn!("[SYNC] Periodic sync failed: {}", e);
                }
                TickFlow::Continue
            }
        })?;
        info!("[SYNC] Periodic sync started ({:?})", self.sync_interval);
        Ok(ticker)
    }

    pub fn queue_stats(&self) -> TrackerResult<QueueStats> {
        Ok(self.db.get_queue_stats()?)
    }

    pub fn last_sync_at(&self) -> TrackerResult<Option<i64>> {
        let value = self.db.get_app_meta("last_sync_at")?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub fn failed_entries(&self, limit: i32) -> TrackerResult<Vec<FailedEntryInfo>> {
        Ok(self.db.get_failed_entries(limit)?)
    }

    /// Give failed entries a fresh retry budget
    pub fn retry_failed_entries(&self, limit: i32) -> TrackerResult<i32> {
        let count = self.db.reset_failed_entries(limit)?;
        if count > 0 {
            info!("[SYNC] {} failed entries reset to pending", count);
        }
        Ok(count)
    }
}
