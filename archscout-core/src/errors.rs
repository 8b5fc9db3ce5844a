use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from embedding and chat model calls.
///
/// Callers retry transient errors; permanent ones will not go away by asking again.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(BoxedError),
    #[error("Permanent error: {0}")]
    PermanentError(BoxedError),
    #[error("Transient error: {0}")]
    TransientError(BoxedError),
}

impl ModelError {
    pub fn permanent(e: impl Into<BoxedError>) -> Self {
        ModelError::PermanentError(e.into())
    }

    pub fn transient(e: impl Into<BoxedError>) -> Self {
        ModelError::TransientError(e.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::TransientError(_))
    }
}

impl From<anyhow::Error> for ModelError {
    fn from(e: anyhow::Error) -> Self {
        ModelError::PermanentError(e.into())
    }
}

/// Reasons a task refuses to start
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TaskStartError {
    #[error("Task {0} is already running")]
    AlreadyRunning(String),
    #[error("Task {requested} is exclusive but {running} is still running")]
    AnotherTaskRunning { requested: String, running: String },
    #[error("Task {requested} is outside the scope of the previous task {previous}, run a scan first")]
    ScopeMismatch { requested: String, previous: String },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings from {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Settings file {path} is not valid json")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to write settings to {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
