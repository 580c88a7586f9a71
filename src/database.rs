use chrono::Utc;
use rusqlite::Error::InvalidParameterName;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::models::{FailedEntryInfo, QueueStats};

/// Upper bound on unsent rows kept locally
const MAX_QUEUE_SIZE: i32 = 10_000;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Error propagation is unchanged; the caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!("[DB] {}: Disk full. Free space on drive.", context);
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check the data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// A queued manual entry waiting to be replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: i64,
    pub payload: String,
    pub retry_count: i32,
    pub idempotency_key: Option<String>,
}

/// Local store for manual entries whose countdown completed but whose save failed
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Lock the connection, mapping a poisoned mutex to a rusqlite error
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: detect corruption before touching the schema
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| {
                warn!("[DB] Failed to enable foreign keys: {}. Continuing.", e);
            })
            .ok();

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory store, for embedders that only want in-process retries
    pub fn open_in_memory() -> SqliteResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS pending_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_retry_at INTEGER,
                error_message TEXT
            )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS app_meta (key TEXT PRIMARY KEY, value TEXT)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_pending_entries_status ON pending_entries(status)",
                [],
            )?;
        }
        // Migration 2: idempotency_key
        if current < 2 {
            let _ = conn.execute(
                "ALTER TABLE pending_entries ADD COLUMN idempotency_key TEXT",
                [],
            );
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn get_app_meta(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM app_meta WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }

    pub fn set_app_meta(&self, key: &str, value: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO app_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Queue a serialized `CreateTimeEntryRequest`.
    /// An unsent row with the same idempotency key is reused instead of duplicated;
    /// a failed one is moved back to pending.
    pub fn enqueue_entry(&self, payload: &str, idempotency_key: &str) -> SqliteResult<i64> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();

        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(|e| {
                log_io_error_if_any("enqueue_entry begin", &e);
                error!("[DB] Failed to begin transaction in enqueue_entry: {}", e);
                e
            })?;

        let existing: Option<(i64, String)> = match conn.query_row(
            "SELECT id, status FROM pending_entries
             WHERE idempotency_key = ?1 AND status IN ('pending', 'failed')
             ORDER BY created_at DESC LIMIT 1",
            params![idempotency_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                return Err(e);
            }
        };

        match existing {
            Some((id, status)) if status == "pending" => {
                warn!(
                    "[DB] Duplicate manual entry {} already queued as {} (skipping)",
                    idempotency_key, id
                );
                let _ = conn.execute("ROLLBACK", []);
                return Ok(id);
            }
            Some((id, _)) => {
                // Same entry failed again: give the dead row a fresh retry budget
                let revived = conn.execute(
                    "UPDATE pending_entries
                     SET status = 'pending', retry_count = 0, last_retry_at = NULL, payload = ?1
                     WHERE id = ?2",
                    params![payload, id],
                );
                if let Err(e) = revived {
                    log_io_error_if_any("enqueue_entry revive", &e);
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e);
                }
                conn.execute("COMMIT", []).map_err(|e| {
                    log_io_error_if_any("enqueue_entry commit", &e);
                    let _ = conn.execute("ROLLBACK", []);
                    e
                })?;
                info!("[DB] Failed entry {} re-queued for retry", id);
                return Ok(id);
            }
            None => {}
        }

        let queue_size: i32 = match conn.query_row(
            "SELECT COUNT(*) FROM pending_entries WHERE status IN ('pending', 'failed')",
            [],
            |row| row.get(0),
        ) {
            Ok(size) => size,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                return Err(e);
            }
        };
        if queue_size >= MAX_QUEUE_SIZE {
            warn!(
                "[DB] Queue limit reached ({} entries), refusing new entry",
                queue_size
            );
            let _ = conn.execute("ROLLBACK", []);
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("Queue limit reached".to_string()),
            ));
        }

        let result = conn.execute(
            "INSERT INTO pending_entries (payload, status, created_at, idempotency_key)
             VALUES (?1, 'pending', ?2, ?3)",
            params![payload, now, idempotency_key],
        );

        match result {
            Ok(_) => {
                conn.execute("COMMIT", []).map_err(|e| {
                    log_io_error_if_any("enqueue_entry commit", &e);
                    error!("[DB] Failed to commit transaction in enqueue_entry: {}", e);
                    let _ = conn.execute("ROLLBACK", []);
                    e
                })?;
                let id = conn.last_insert_rowid();
                info!("[DB] Manual entry queued for retry as {}", id);
                Ok(id)
            }
            Err(e) => {
                log_io_error_if_any("enqueue_entry", &e);
                error!(
                    "[DB] Failed to insert entry: {}. Rolling back transaction.",
                    e
                );
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Pending rows whose backoff has elapsed, oldest first.
    /// Backoff: 10s → 20s → 40s → 80s → 120s (max)
    pub fn get_retry_entries(&self, max_retries: i32, limit: i32) -> SqliteResult<Vec<PendingEntry>> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();

        let mut stmt = conn.prepare(
            "SELECT id, payload, retry_count, idempotency_key FROM pending_entries
     WHERE status = 'pending' AND retry_count < ?1
     AND (last_retry_at IS NULL OR last_retry_at + CASE
              WHEN retry_count = 0 THEN 10
              WHEN retry_count = 1 THEN 20
              WHEN retry_count = 2 THEN 40
              WHEN retry_count = 3 THEN 80
              ELSE 120
          END <= ?2)
     ORDER BY created_at ASC, id ASC
     LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![max_retries, now, limit], |row| {
            Ok(PendingEntry {
                id: row.get(0)?,
                payload: row.get(1)?,
                retry_count: row.get(2)?,
                idempotency_key: row.get(3)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Stamp last_retry_at so a concurrent run does not pick the same rows during network I/O
    pub fn claim_entries(&self, ids: &[i64]) -> SqliteResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();
        for id in ids {
            conn.execute(
                "UPDATE pending_entries SET last_retry_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(())
    }

    pub fn mark_entry_sent(&self, id: i64) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pending_entries SET status = 'sent', error_message = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn update_entry_status_with_error(
        &self,
        id: i64,
        status: &str,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();
        conn.execute(
            "UPDATE pending_entries
     SET status = ?1, retry_count = ?2, last_retry_at = ?3, error_message = COALESCE(?4, error_message)
     WHERE id = ?5",
            params![status, retry_count, now, error_message, id],
        )?;
        Ok(())
    }

    fn count_with_status(&self, status: &str) -> SqliteResult<i32> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM pending_entries WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )
    }

    pub fn get_pending_count(&self) -> SqliteResult<i32> {
        self.count_with_status("pending")
    }

    pub fn get_failed_count(&self) -> SqliteResult<i32> {
        self.count_with_status("failed")
    }

    pub fn get_queue_stats(&self) -> SqliteResult<QueueStats> {
        Ok(QueueStats {
            pending_count: self.count_with_status("pending")?,
            failed_count: self.count_with_status("failed")?,
            sent_count: self.count_with_status("sent")?,
        })
    }

    pub fn get_failed_entries(&self, limit: i32) -> SqliteResult<Vec<FailedEntryInfo>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload, retry_count, created_at, last_retry_at, error_message
             FROM pending_entries
             WHERE status = 'failed'
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok(FailedEntryInfo {
                id: row.get::<_, i64>(0)?,
                payload: row.get::<_, String>(1)?,
                retry_count: row.get::<_, i32>(2)?,
                created_at: row.get::<_, i64>(3)?,
                last_retry_at: row.get::<_, Option<i64>>(4)?,
                error_message: row.get::<_, Option<String>>(5)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Move failed rows back to pending with a fresh retry budget
    pub fn reset_failed_entries(&self, limit: i32) -> SqliteResult<i32> {
        let conn = self.lock_conn()?;
        let count = conn.execute(
            "UPDATE pending_entries
             SET status = 'pending', retry_count = 0, last_retry_at = NULL
             WHERE status = 'failed'
             AND id IN (
                 SELECT id FROM pending_entries
                 WHERE status = 'failed'
                 ORDER BY created_at ASC
                 LIMIT ?1
             )",
            params![limit],
        )?;
        Ok(count as i32)
    }
}
