use crate::core::domain::{ExecutionConfig, ExecutionResult};

/// Runs code for one language inside a worker it owns exclusively.
///
/// `execute` never fails: timeouts, worker crashes and exceptions in the
/// submitted code are all reported through the returned result.
#[mockall::automock]
#[async_trait::async_trait]
pub trait LanguageExecutor: std::fmt::Debug + Send + Sync {
    async fn execute(&self, code: &str, config: &ExecutionConfig) -> ExecutionResult;

    /// Kills the active worker, if any. The interrupted `execute` resolves
    /// with a stopped result.
    fn stop(&self);

    fn is_ready(&self) -> bool;

    /// Brings the language runtime to a loaded state ahead of the first
    /// real execution.
    async fn warm_up(&self);
}
