use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("completion request failed: {0}")]
    Completion(String),

    #[error("completion stream error: {0}")]
    Stream(String),

    #[error("no handler registered for tool: {0}")]
    ToolNotFound(String),

    #[error("tool {name} failed: {message}")]
    Tool { name: String, message: String },

    #[error("gave up after {0} tool rounds in one turn")]
    ToolLoopExhausted(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
