use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const DEFAULT_USER_TYPE: &str = "TeamMember";

/// Billing cadence of a time entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingType {
    #[default]
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// The acting user. Always passed in explicitly; the core never looks it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub user_type: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_type: None,
        }
    }

    pub fn with_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.user_type = Some(user_type.into());
        self
    }

    pub fn user_type(&self) -> &str {
        match self.user_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => DEFAULT_USER_TYPE,
        }
    }
}

/// `{success, data, message}` wrapper used by every endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn failure_message(message: Option<String>) -> String {
        message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Request was not successful".to_string())
    }

    /// `data` is required on success
    pub fn into_result(self) -> TrackerResult<T> {
        if !self.success {
            return Err(TrackerError::Api(Self::failure_message(self.message)));
        }
        self.data
            .ok_or_else(|| TrackerError::Decode("Missing data in successful response".into()))
    }

    /// `data` may legitimately be null on success
    pub fn into_optional(self) -> TrackerResult<Option<T>> {
        if !self.success {
            return Err(TrackerError::Api(Self::failure_message(self.message)));
        }
        Ok(self.data)
    }
}

/// Server-side in-progress record, as handed to reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    #[serde(alias = "_id")]
    pub id: String,
    pub start_time: String,
}

impl ActiveTimer {
    pub fn new(id: impl Into<String>, start_time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: start_time.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTimerRequest {
    pub user_id: String,
    pub project: String,
    pub task: String,
    pub description: String,
    pub tracking_type: TrackingType,
    pub user_type: String,
}

/// Manual entry payload. Also the unit stored in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimeEntryRequest {
    pub user_id: String,
    pub project: String,
    pub task: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: u64,
    pub billable: bool,
    pub tracking_type: TrackingType,
    pub is_manual_entry: bool,
    pub user_type: String,
}

impl CreateTimeEntryRequest {
    /// Same payload, same key: a replayed save is deduplicated by the server and the queue
    pub fn idempotency_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("manual-{:x}", hasher.finish())
    }
}

/// Persisted time entry as returned by the API.
/// Lenient: only the fields the core reads are typed, `project`/`task` may come back populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeEntry {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub user_id: Option<serde_json::Value>,
    pub project: Option<serde_json::Value>,
    pub task: Option<serde_json::Value>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
    pub billable: Option<bool>,
    pub is_manual_entry: Option<bool>,
    pub tracking_type: Option<TrackingType>,
}

impl TimeEntry {
    pub fn as_active_timer(&self) -> Option<ActiveTimer> {
        match (&self.id, &self.start_time) {
            (Some(id), Some(start)) => Some(ActiveTimer::new(id.clone(), start.clone())),
            _ => None,
        }
    }

    /// Duration with the zero/missing-duration normalization applied
    pub fn resolved_duration(&self) -> Option<u64> {
        crate::duration::normalize_duration(
            self.duration,
            self.start_time.as_deref(),
            self.end_time.as_deref(),
        )
    }
}

/// Retry queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending_count: i32,
    pub failed_count: i32,
    pub sent_count: i32,
}

/// A queued manual entry that exhausted its retries
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntryInfo {
    pub id: i64,
    pub payload: String,
    pub retry_count: i32,
    pub created_at: i64,
    pub last_retry_at: Option<i64>,
    pub error_message: Option<String>,
}
