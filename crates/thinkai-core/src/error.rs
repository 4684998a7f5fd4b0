//! Error types for the chat controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A response is still streaming; the controller handles one exchange at a time
    #[error("a response is already streaming, wait for it to finish")]
    Busy,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
