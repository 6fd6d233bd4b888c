use std::io;

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, EngineErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// The requested language has no sandbox path.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The executor refused the submission before spawning anything, e.g. a
    /// scratch-file name or interpreter command outside the whitelist.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The outer wall-clock budget expired.
    #[error("command timed out")]
    Timeout,

    /// The interpreter was killed by a signal (typically a resource limit).
    #[error("command was killed by signal {0}")]
    Signal(i32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum EngineErr {
    /// Malformed payload or out-of-range argument. Reported to the caller
    /// via an `error` event or 400; never broadcast.
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A non-teacher attempted a teacher-only action, or a reconnect token
    /// did not match.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Session code collision during create.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Executor refusals and limit trips. Recovered locally: the engine
    /// folds these into an `execution-result` for the caller.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    /// The evaluator failed after retries. Recovered locally into the
    /// default summary; never surfaced as a protocol error.
    #[error("evaluator unavailable: {0}")]
    Evaluator(String),

    /// KV or network blip. Logged; the in-memory mutation stands.
    #[error("transient error: {0}")]
    Transient(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}
