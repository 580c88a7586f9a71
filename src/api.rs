use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{ActiveTimer, ApiEnvelope, CreateTimeEntryRequest, StartTimerRequest, TimeEntry};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Time-entry REST collaborator. The controller only talks to the server through this seam.
#[async_trait]
pub trait TimeEntryApi: Send + Sync {
    async fn start_timer(&self, request: &StartTimerRequest) -> TrackerResult<TimeEntry>;

    async fn stop_timer(&self, timer_id: &str) -> TrackerResult<TimeEntry>;

    async fn create_time_entry(
        &self,
        request: &CreateTimeEntryRequest,
        idempotency_key: Option<&str>,
    ) -> TrackerResult<TimeEntry>;

    /// `Ok(None)` when the user has no running timer
    async fn fetch_active_timer(&self, user_id: &str) -> TrackerResult<Option<ActiveTimer>>;
}

/// reqwest-backed implementation
#[derive(Clone)]
pub struct HttpTimeEntryApi {
    client: Client,
    api_base_url: String,
    app_version: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpTimeEntryApi {
    pub fn new(config: &TrackerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("[API] Failed to build HTTP client ({}), using defaults", e);
                Client::new()
            });
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            app_version: config.app_version.clone(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Bearer token for subsequent requests. Storage of the token is the caller's concern.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    async fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request
            .header("Content-Type", "application/json")
            .header("X-App-Version", &self.app_version);
        if let Some(token) = self.access_token.read().await.as_deref() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> TrackerResult<Response> {
        let request = self.with_headers(request).await;
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        // Error bodies are usually `{success:false, message}`; fall back to raw text
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
            .ok()
            .and_then(|env| env.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    body
                }
            });
        warn!("[API] HTTP {}: {}", status.as_u16(), message);
        Err(TrackerError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn envelope<T: DeserializeOwned>(response: Response) -> TrackerResult<ApiEnvelope<T>> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TrackerError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TimeEntryApi for HttpTimeEntryApi {
    async fn start_timer(&self, request: &StartTimerRequest) -> TrackerResult<TimeEntry> {
        debug!("[API] Start timer: project={} task={}", request.project, request.task);
        let builder = self
            .client
            .post(self.url("/time-entries/start"))
            .json(request);
        let response = self.send(builder).await?;
        Self::envelope::<TimeEntry>(response).await?.into_result()
    }

    async fn stop_timer(&self, timer_id: &str) -> TrackerResult<TimeEntry> {
        debug!("[API] Stop timer {}", timer_id);
        // id in URL, empty body
        let builder = self
            .client
            .put(self.url(&format!("/time-entries/{}/stop", timer_id)))
            .json(&serde_json::json!({}));
        let response = self.send(builder).await?;
        Self::envelope::<TimeEntry>(response).await?.into_result()
    }

    async fn create_time_entry(
        &self,
        request: &CreateTimeEntryRequest,
        idempotency_key: Option<&str>,
    ) -> TrackerResult<TimeEntry> {
        debug!(
            "[API] Create manual entry: {}s {} → {}",
            request.duration, request.start_time, request.end_time
        );
        let mut builder = self.client.post(self.url("/time-entries")).json(request);
        if let Some(key) = idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }
        let response = self.send(builder).await?;
        Self::envelope::<TimeEntry>(response).await?.into_result()
    }

    async fn fetch_active_timer(&self, user_id: &str) -> TrackerResult<Option<ActiveTimer>> {
        let url = reqwest::Url::parse_with_params(
            &self.url("/time-entries/active"),
            &[("userId", user_id)],
        )
        .map_err(|e| TrackerError::Transport(format!("Invalid URL: {}", e)))?;
        let response = self.send(self.client.get(url)).await?;
        Self::envelope::<ActiveTimer>(response).await?.into_optional()
    }
}
