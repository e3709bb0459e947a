use thiserror::Error;

/// Caller misuse. Always reported before any worker is spawned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Python executor not loaded: call preload_python() first")]
    PythonNotLoaded,
    #[error("invalid execution config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker is not accepting messages")]
    Disconnected,
}
