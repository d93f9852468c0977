//! Error taxonomy for backend calls and job execution

/// Failure surfaced by the document backend.
///
/// Backends map their format-specific errors into these variants;
/// `PasswordRequired` is special-cased because the load job keeps the
/// partially-opened handle around for a retry with credentials.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("password required")]
    PasswordRequired,

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("{domain} error {code}: {message}")]
    Backend {
        domain: String,
        code: i32,
        message: String,
    },
}

impl BackendError {
    pub fn backend(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::Backend {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

/// Error stored on a job that reached the `Failed` state.
///
/// `Internal` covers faults caught at the dispatch boundary (a panic inside
/// `run`, a job executed without a bound document); they are converted into
/// a failed job instead of taking down a worker thread.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl JobError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
