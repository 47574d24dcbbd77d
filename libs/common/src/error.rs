use thiserror::Error;

/// Error taxonomy shared by both cores.
///
/// Each variant maps to one of the propagation policies of the error design:
/// `Transient` is retried via requeue+backoff, `Conflict` gets one immediate
/// retry then backoff, `AlreadyExists`/`NotFound` are swallowed as idempotent
/// success by callers, `Malformed` acknowledges without retry, `PermissionDenied`
/// rejects the caller, `Fatal` exits the process.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("database error: {0}")]
    Database(#[source] Box<sqlx::Error>),

    #[error("kube error: {0}")]
    Kube(#[source] Box<kube::Error>),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("http error: {0}")]
    Http(#[source] Box<reqwest::Error>),

    #[error("serialization error: {0}")]
    Serialization(#[source] Box<serde_json::Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the error is worth retrying via requeue+backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) | Error::Conflict(_) | Error::Database(_) | Error::Kube(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.status().is_none_or(|s| s.is_server_error()),
            _ => false,
        }
    }

    /// True when the underlying operation's goal state already holds.
    pub fn is_idempotent_success(&self) -> bool {
        matches!(self, Error::AlreadyExists(_) | Error::NotFound(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Error::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::AlreadyExists(db.to_string())
            }
            _ => Error::Database(Box::new(e)),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 422 => Error::Conflict(ae.message.clone()),
            _ => Error::Kube(Box::new(e)),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(Box::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

impl From<async_nats::jetstream::context::CreateStreamError> for Error {
    fn from(e: async_nats::jetstream::context::CreateStreamError) -> Self {
        Error::Stream(e.to_string())
    }
}
