//! Error types for vv-speaker.

use thiserror::Error;

/// Result type alias for vv-speaker operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// TTS or LLM collaborator unreachable, failed, or timed out
    #[error("upstream error: {0}")]
    Upstream(String),

    /// No audio player program available
    #[error("no audio player found: {0}")]
    PlayerNotFound(String),

    /// The audio player program failed to start or exited non-zero
    #[error("audio player failed: {0}")]
    Player(String),

    /// Caller supplied an unusable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request queue at capacity
    #[error("queue full")]
    QueueFull,

    /// Voice name not present in the VOICEVOX directory
    #[error("speaker not found: {0}")]
    SpeakerNotFound(String),

    /// The queue worker is gone
    #[error("speak worker stopped")]
    WorkerStopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
