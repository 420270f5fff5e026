use thiserror::Error;

/// Failures while handling one event of a call.
///
/// None of these end the call except [`SessionError::TransportClosed`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed transport frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("malformed media payload: {0}")]
    Media(#[from] base64::DecodeError),

    #[error("transport closed")]
    TransportClosed,

    #[error("{0} pipeline stage is gone")]
    StageClosed(&'static str),
}
