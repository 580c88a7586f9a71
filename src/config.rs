use std::time::Duration;
use tracing::warn;

/// Runtime configuration for the tracker core (API endpoint, cadence, retry policy)
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// Sent in X-App-Version so the server can spot version skew
    pub app_version: String,
    /// Period of both the elapsed ticker and the countdown
    pub tick_interval: Duration,
    /// How long the final duration stays on screen after Stop before the form resets
    pub stop_grace_period: Duration,
    pub max_sync_retries: i32,
    pub sync_interval: Duration,
    pub active_timer_poll_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            tick_interval: Duration::from_secs(1),
            stop_grace_period: Duration::from_secs(2),
            max_sync_retries: 5,
            sync_interval: Duration::from_secs(60),
            active_timer_poll_interval: Duration::from_secs(30),
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `TIMESHEET_*` environment variables.
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("TIMESHEET_API_BASE_URL") {
            let trimmed = url.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                warn!("[CONFIG] TIMESHEET_API_BASE_URL is empty, keeping default");
            } else {
                config.api_base_url = trimmed.to_string();
            }
        }
        if let Some(secs) = parse_u64(&lookup, "TIMESHEET_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = secs;
        }
        if let Some(secs) = parse_u64(&lookup, "TIMESHEET_STOP_GRACE_SECS") {
            config.stop_grace_period = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_u64(&lookup, "TIMESHEET_MAX_SYNC_RETRIES") {
            config.max_sync_retries = retries.min(i32::MAX as u64) as i32;
        }
        if let Some(secs) = parse_u64(&lookup, "TIMESHEET_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_u64(&lookup, "TIMESHEET_POLL_INTERVAL_SECS") {
            config.active_timer_poll_interval = Duration::from_secs(secs.max(1));
        }

        config
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[CONFIG] Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
