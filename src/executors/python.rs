use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::RunnerSettings;
use crate::constants::{DEFAULT_PYTHON_COLD_START_GRACE_MS, PYTHON_LOADED_SENTINEL};
use crate::core::domain::{ExecutionConfig, ExecutionResult, OutputLine};
use crate::core::session::{SessionRequest, SessionState, WorkerSupervisor};
use crate::core::traits::executor::LanguageExecutor;
use crate::core::traits::worker::WorkerSpawner;
use crate::native::process::ProcessSpawner;
use crate::transform::{PythonLoopGuard, SourceTransform};

/// Python executor. Until the interpreter has reported itself loaded once,
/// every timeout is padded by the cold start grace.
#[derive(Debug)]
pub struct PythonExecutor {
    supervisor: WorkerSupervisor,
    python_loaded: AtomicBool,
    cold_start_grace: Duration,
    loop_guard: bool,
    warm_up_config: ExecutionConfig,
}

impl PythonExecutor {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, warm_up_config: ExecutionConfig) -> Self {
        Self {
            supervisor: WorkerSupervisor::new(spawner),
            python_loaded: AtomicBool::new(false),
            cold_start_grace: Duration::from_millis(DEFAULT_PYTHON_COLD_START_GRACE_MS),
            loop_guard: false,
            warm_up_config,
        }
    }

    /// Executor backed by `python3` worker processes.
    pub fn native(settings: &RunnerSettings, warm_up_config: ExecutionConfig) -> Self {
        Self::new(
            Arc::new(ProcessSpawner::python(&settings.python_path)),
            warm_up_config,
        )
        .with_cold_start_grace(Duration::from_millis(settings.python_cold_start_grace_ms))
        .with_loop_guard(settings.python_loop_guard)
    }

    pub fn with_cold_start_grace(mut self, grace: Duration) -> Self {
        self.cold_start_grace = grace;
        self
    }

    /// Instruments loops with [`PythonLoopGuard`] before sending code.
    pub fn with_loop_guard(mut self, enabled: bool) -> Self {
        self.loop_guard = enabled;
        self
    }

    pub fn is_python_loaded(&self) -> bool {
        self.python_loaded.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.supervisor.state()
    }

    fn session_timeout(&self, config: &ExecutionConfig) -> Duration {
        let timeout = Duration::from_millis(config.timeout_ms);
        if self.is_python_loaded() {
            timeout
        } else {
            timeout + self.cold_start_grace
        }
    }
}

#[async_trait::async_trait]
impl LanguageExecutor for PythonExecutor {
    #[tracing::instrument(skip(self, code), fields(len = code.len()))]
    async fn execute(&self, code: &str, config: &ExecutionConfig) -> ExecutionResult {
        let loop_guard = PythonLoopGuard::new(config.max_iterations);
        let transform: Option<&dyn SourceTransform> = if self.loop_guard {
            Some(&loop_guard)
        } else {
            None
        };
        let mark_loaded = |line: &OutputLine| {
            if line.content == PYTHON_LOADED_SENTINEL && !self.is_python_loaded() {
                tracing::info!("Python runtime loaded");
                self.python_loaded.store(true, Ordering::SeqCst);
            }
        };

        self.supervisor
            .run(SessionRequest {
                code,
                config,
                timeout: self.session_timeout(config),
                transform,
                on_output: Some(&mark_loaded),
            })
            .await
    }

    fn stop(&self) {
        self.supervisor.stop();
    }

    /// The worker's `ready` only means the process exists; the interpreter
    /// counts as ready once it has reported itself loaded.
    fn is_ready(&self) -> bool {
        self.supervisor.is_ready() && self.is_python_loaded()
    }

    #[tracing::instrument(skip(self))]
    async fn warm_up(&self) {
        if self.is_python_loaded() {
            return;
        }
        let result = self.execute("", &self.warm_up_config).await;
        if !result.success {
            tracing::warn!("Python warm-up failed: {:?}", result.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{ExecutionOutcome, OutputKind};
    use crate::stubs::worker::{WorkerStep, WorkerStub};

    fn python_steps() -> Vec<WorkerStep> {
        vec![
            WorkerStep::output(OutputKind::Info, PYTHON_LOADED_SENTINEL),
            WorkerStep::output(OutputKind::Log, "hello"),
            WorkerStep::Complete(4),
        ]
    }

    fn config(timeout_ms: u64) -> ExecutionConfig {
        ExecutionConfig::new(timeout_ms, 100).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_marks_runtime_loaded() {
        let executor = PythonExecutor::new(Arc::new(WorkerStub::new(python_steps())), config(1000));

        assert!(!executor.is_ready());
        let result = executor.execute("print('hello')", &config(1000)).await;

        assert!(result.success);
        assert!(executor.is_python_loaded());
        assert!(executor.is_ready());
        assert_eq!(result.outputs[0].content, PYTHON_LOADED_SENTINEL);
        assert_eq!(result.outputs[1].content, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_without_sentinel_is_not_ready() {
        let stub = WorkerStub::new(vec![WorkerStep::Complete(1)]);
        let executor = PythonExecutor::new(Arc::new(stub), config(1000));

        executor.execute("pass", &config(1000)).await;

        assert!(!executor.is_python_loaded());
        assert!(!executor.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_timeout_is_padded() {
        let stub = Arc::new(WorkerStub::new(vec![WorkerStep::Hang]));
        let executor = PythonExecutor::new(stub, config(50))
            .with_cold_start_grace(Duration::from_millis(300));

        let result = executor.execute("while True: pass", &config(50)).await;

        assert_eq!(result.outcome, ExecutionOutcome::TimedOut);
        assert_eq!(result.execution_time_ms, 350);
        assert!(
            result
                .outputs
                .last()
                .unwrap()
                .content
                .contains("timed out after 350ms")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_timeout_is_not_padded() {
        let mut steps = python_steps();
        steps.insert(2, WorkerStep::Delay(Duration::from_secs(3600)));
        let executor = PythonExecutor::new(Arc::new(WorkerStub::new(steps)), config(50))
            .with_cold_start_grace(Duration::from_millis(300));

        let first = executor.execute("import time", &config(50)).await;
        assert_eq!(first.execution_time_ms, 350);
        assert!(executor.is_python_loaded());

        let second = executor.execute("import time", &config(50)).await;
        assert_eq!(second.outcome, ExecutionOutcome::TimedOut);
        assert_eq!(second.execution_time_ms, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_is_untransformed_by_default() {
        let stub = Arc::new(WorkerStub::new(python_steps()));
        let executor = PythonExecutor::new(stub.clone(), config(1000));

        executor
            .execute("for i in range(3):\n    print(i)", &config(1000))
            .await;

        assert_eq!(
            stub.received_code(),
            vec!["for i in range(3):\n    print(i)".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_guard_uses_config_budget() {
        let stub = Arc::new(WorkerStub::new(python_steps()));
        let executor = PythonExecutor::new(stub.clone(), config(1000)).with_loop_guard(true);

        executor
            .execute("for i in range(3):\n    print(i)", &ExecutionConfig::new(1000, 7).unwrap())
            .await;

        let sent = stub.received_code();
        assert!(sent[0].starts_with("class __LoopGuard:"));
        assert!(sent[0].contains("max_iterations = 7"));
        assert!(sent[0].ends_with("for i in range(3):\n    __LoopGuard.check()\n    print(i)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_loads_runtime_once() {
        let stub = Arc::new(WorkerStub::new(python_steps()));
        let executor = PythonExecutor::new(stub.clone(), config(1000));

        executor.warm_up().await;
        executor.warm_up().await;

        assert!(executor.is_ready());
        assert_eq!(stub.spawn_count(), 1);
        assert_eq!(stub.received_code(), vec![String::new()]);
    }
}
