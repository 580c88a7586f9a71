use thiserror::Error;

/// Local validation failures. Detected before any network call; never mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a project")]
    MissingProject,
    #[error("Please select a task")]
    MissingTask,
    #[error("Start time is required")]
    MissingStart,
    #[error("End time is required")]
    MissingEnd,
    #[error("Invalid date/time: {0}")]
    InvalidTimestamp(String),
    #[error("End time must be after start time")]
    EndNotAfterStart,
}

/// Errors surfaced by the tracker core
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Another Start/Stop is still in flight; the request was ignored.
    #[error("Another timer operation is already in progress")]
    Busy,
    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
    #[error("No active timer to stop")]
    NoActiveTimer,
    #[error("Network: {0}")]
    Transport(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("API: {0}")]
    Api(String),
    #[error("Decode: {0}")]
    Decode(String),
    #[error("DB: {0}")]
    Db(String),
    #[error("Tracker state mutex poisoned")]
    Poisoned,
    /// Periodic tasks need a tokio runtime
    #[error("No async runtime: {0}")]
    Runtime(String),
}

impl TrackerError {
    /// Whether a later replay of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Transport(_) => true,
            TrackerError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TrackerError::Decode(e.to_string())
        } else {
            TrackerError::Transport(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Db(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for TrackerError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        TrackerError::Poisoned
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
