use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store replied with an error: {0}")]
    ErrorReply(String),

    #[error("store exchange timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store closed the connection after {received} of {expected} replies")]
    ClosedEarly { received: usize, expected: usize },

    #[error("unexpected store reply: {0}")]
    Protocol(String),

    #[error("invalid store URL: {0}")]
    InvalidUrl(String),

    #[error("unknown session store backend {0:?}")]
    UnknownBackend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}
