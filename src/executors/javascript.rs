use std::sync::Arc;
use std::time::Duration;

use crate::config::RunnerSettings;
use crate::core::domain::{ExecutionConfig, ExecutionResult};
use crate::core::session::{SessionRequest, SessionState, WorkerSupervisor};
use crate::core::traits::executor::LanguageExecutor;
use crate::core::traits::worker::WorkerSpawner;
use crate::native::process::ProcessSpawner;
use crate::transform::JavaScriptLoopGuard;

#[derive(Debug)]
pub struct JavaScriptExecutor {
    supervisor: WorkerSupervisor,
    loop_guard: JavaScriptLoopGuard,
}

impl JavaScriptExecutor {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            supervisor: WorkerSupervisor::new(spawner),
            loop_guard: JavaScriptLoopGuard::new(),
        }
    }

    /// Executor backed by `node` worker processes.
    pub fn native(settings: &RunnerSettings) -> Self {
        Self::new(Arc::new(ProcessSpawner::javascript(&settings.node_path)))
    }

    pub fn state(&self) -> SessionState {
        self.supervisor.state()
    }
}

#[async_trait::async_trait]
impl LanguageExecutor for JavaScriptExecutor {
    #[tracing::instrument(skip(self, code), fields(len = code.len()))]
    async fn execute(&self, code: &str, config: &ExecutionConfig) -> ExecutionResult {
        self.supervisor
            .run(SessionRequest {
                code,
                config,
                timeout: Duration::from_millis(config.timeout_ms),
                transform: Some(&self.loop_guard),
                on_output: None,
            })
            .await
    }

    fn stop(&self) {
        self.supervisor.stop();
    }

    fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    async fn warm_up(&self) {}
}
