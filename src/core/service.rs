use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::RunnerSettings;
use crate::core::domain::{
    ExecutionConfig, ExecutionResult, Language, OutputLine, PartialExecutionConfig,
};
use crate::core::errors::RunnerError;
use crate::core::traits::executor::LanguageExecutor;
use crate::executors::{JavaScriptExecutor, PythonExecutor};

pub type OutputCallback = Arc<dyn Fn(&OutputLine) + Send + Sync>;
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn LanguageExecutor> + Send + Sync>;

/// Entry point for running user code. Owns one executor per language; the
/// Python executor only exists once `preload_python` has run.
pub struct CodeRunnerService {
    defaults: ExecutionConfig,
    javascript: Arc<dyn LanguageExecutor>,
    python: Mutex<Option<Arc<dyn LanguageExecutor>>>,
    python_factory: ExecutorFactory,
    preload_lock: tokio::sync::Mutex<()>,
    auto_load_python: bool,
    current: Mutex<Option<(u64, Arc<dyn LanguageExecutor>)>>,
    generation: AtomicU64,
    output_callback: Mutex<Option<OutputCallback>>,
}

impl fmt::Debug for CodeRunnerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRunnerService")
            .field("defaults", &self.defaults)
            .field("javascript", &self.javascript)
            .field("python", &*lock(&self.python))
            .field("auto_load_python", &self.auto_load_python)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CodeRunnerService {
    /// Service backed by `node` and `python3` worker processes.
    pub fn new(settings: &RunnerSettings) -> Result<Self, RunnerError> {
        let defaults = settings.execution_defaults()?;
        let javascript: Arc<dyn LanguageExecutor> = Arc::new(JavaScriptExecutor::native(settings));
        let python_settings = settings.clone();
        let python_factory: ExecutorFactory = Arc::new(move || {
            Arc::new(PythonExecutor::native(&python_settings, defaults)) as Arc<dyn LanguageExecutor>
        });

        Ok(Self::with_executors(defaults, javascript, python_factory)
            .with_auto_load_python(settings.auto_load_python))
    }

    pub fn with_executors(
        defaults: ExecutionConfig,
        javascript: Arc<dyn LanguageExecutor>,
        python_factory: ExecutorFactory,
    ) -> Self {
        Self {
            defaults,
            javascript,
            python: Mutex::new(None),
            python_factory,
            preload_lock: tokio::sync::Mutex::new(()),
            auto_load_python: false,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            output_callback: Mutex::new(None),
        }
    }

    /// Load the Python executor on first use instead of failing with
    /// [`RunnerError::PythonNotLoaded`].
    pub fn with_auto_load_python(mut self, enabled: bool) -> Self {
        self.auto_load_python = enabled;
        self
    }

    pub fn defaults(&self) -> ExecutionConfig {
        self.defaults
    }

    /// Runs `code` to completion. Execution failures (errors, timeouts,
    /// crashes, stops) come back inside the result; `Err` is reserved for
    /// requests that never reach a worker.
    #[tracing::instrument(skip(self, code), fields(len = code.len()))]
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        overrides: PartialExecutionConfig,
    ) -> Result<ExecutionResult, RunnerError> {
        let config = self.defaults.merge(&overrides)?;
        let language: Language = language.parse()?;
        let executor = self.resolve(language).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.current) = Some((generation, executor.clone()));
        tracing::debug!(%language, generation, ?config, "Dispatching execution");

        let result = executor.execute(code, &config).await;

        {
            let mut current = lock(&self.current);
            if matches!(current.as_ref(), Some((g, _)) if *g == generation) {
                *current = None;
            }
        }

        let callback = lock(&self.output_callback).clone();
        if let Some(callback) = callback {
            for line in &result.outputs {
                callback(line);
            }
        }

        tracing::info!(
            %language,
            success = result.success,
            outcome = ?result.outcome,
            execution_time_ms = result.execution_time_ms,
            "Execution finished"
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        let current = lock(&self.current).take();
        match current {
            Some((generation, executor)) => {
                tracing::debug!(generation, "Stopping current execution");
                executor.stop();
            }
            None => tracing::trace!("Nothing to stop"),
        }
    }

    /// Constructs and warms the Python executor. Safe to call repeatedly and
    /// concurrently; only the first call does any work.
    #[tracing::instrument(skip(self))]
    pub async fn preload_python(&self) {
        let _preloading = self.preload_lock.lock().await;
        if lock(&self.python).is_some() {
            return;
        }

        tracing::info!("Loading Python executor");
        let executor = (self.python_factory)();
        executor.warm_up().await;
        *lock(&self.python) = Some(executor);
    }

    pub fn is_python_ready(&self) -> bool {
        lock(&self.python)
            .as_ref()
            .is_some_and(|executor| executor.is_ready())
    }

    /// Output lines of every later execution are replayed to `callback` in
    /// order once that execution resolves.
    pub fn set_output_callback(&self, callback: Option<OutputCallback>) {
        *lock(&self.output_callback) = callback;
    }

    /// Stops anything running and releases the Python executor. The service
    /// stays usable; Python has to be preloaded again.
    #[tracing::instrument(skip(self))]
    pub fn dispose(&self) {
        self.stop();
        self.set_output_callback(None);
        if let Some(python) = lock(&self.python).take() {
            python.stop();
        }
    }

    async fn resolve(&self, language: Language) -> Result<Arc<dyn LanguageExecutor>, RunnerError> {
        match language {
            Language::JavaScript => Ok(self.javascript.clone()),
            Language::Python => {
                if let Some(python) = lock(&self.python).clone() {
                    return Ok(python);
                }
                if !self.auto_load_python {
                    return Err(RunnerError::PythonNotLoaded);
                }
                self.preload_python().await;
                lock(&self.python).clone().ok_or(RunnerError::PythonNotLoaded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{ExecutionOutcome, OutputKind};
    use crate::core::traits::executor::MockLanguageExecutor;
    use itertools::Itertools;
    use mockall::predicate::*;
    use std::sync::atomic::AtomicUsize;

    fn defaults() -> ExecutionConfig {
        ExecutionConfig::new(5000, 1000).unwrap()
    }

    fn no_python() -> ExecutorFactory {
        Arc::new(|| -> Arc<dyn LanguageExecutor> {
            panic!("python executor should not be constructed")
        })
    }

    fn counting_python_factory(count: Arc<AtomicUsize>) -> ExecutorFactory {
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
            let mut python = MockLanguageExecutor::new();
            python.expect_warm_up().times(1).return_const(());
            python.expect_is_ready().return_const(true);
            python
                .expect_execute()
                .returning(|_, _| ExecutionResult::completed(Vec::new(), 1));
            python.expect_stop().return_const(());
            Arc::new(python) as Arc<dyn LanguageExecutor>
        })
    }

    #[tokio::test]
    async fn test_execute_merges_overrides_into_defaults() {
        let mut js = MockLanguageExecutor::new();
        js.expect_execute()
            .with(eq("1 + 1"), eq(ExecutionConfig::new(50, 1000).unwrap()))
            .times(1)
            .returning(|_, _| ExecutionResult::completed(Vec::new(), 2));
        let service = CodeRunnerService::with_executors(defaults(), Arc::new(js), no_python());

        let result = service
            .execute(
                "1 + 1",
                "javascript",
                PartialExecutionConfig::default().with_timeout_ms(50),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(service.defaults().timeout_ms, 5000);
    }

    #[test]
    fn test_new_rejects_zero_timeout_settings() {
        let settings = RunnerSettings {
            timeout_ms: 0,
            ..RunnerSettings::default()
        };

        let result = CodeRunnerService::new(&settings);

        assert!(matches!(result, Err(RunnerError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_uses_settings_as_defaults() {
        let settings = RunnerSettings {
            timeout_ms: 1500,
            max_iterations: 42,
            ..RunnerSettings::default()
        };

        let service = CodeRunnerService::new(&settings).unwrap();

        assert_eq!(service.defaults(), ExecutionConfig::new(1500, 42).unwrap());
    }

    #[tokio::test]
    async fn test_python_before_preload_is_rejected() {
        let service = CodeRunnerService::with_executors(
            defaults(),
            Arc::new(MockLanguageExecutor::new()),
            no_python(),
        );

        let err = service
            .execute("print(1)", "python", PartialExecutionConfig::default())
            .await
            .unwrap_err();

        assert_eq!(err, RunnerError::PythonNotLoaded);
        assert!(err.to_string().contains("Python executor not loaded"));
        assert!(!service.is_python_ready());
    }

    #[tokio::test]
    async fn test_preload_python_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = CodeRunnerService::with_executors(
            defaults(),
            Arc::new(MockLanguageExecutor::new()),
            counting_python_factory(count.clone()),
        );

        service.preload_python().await;
        service.preload_python().await;
        tokio::join!(service.preload_python(), service.preload_python());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(service.is_python_ready());
        let result = service
            .execute("print(1)", "python", PartialExecutionConfig::default())
            .await
            .unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_auto_load_python_on_first_use() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = CodeRunnerService::with_executors(
            defaults(),
            Arc::new(MockLanguageExecutor::new()),
            counting_python_factory(count.clone()),
        )
        .with_auto_load_python(true);

        for _ in 0..3 {
            let result = service
                .execute("pass", "py", PartialExecutionConfig::default())
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_receives_lines_in_order() {
        let kinds = [OutputKind::Log, OutputKind::Warn, OutputKind::Info, OutputKind::Error];
        let lines = (0..60)
            .map(|i| OutputLine::now(kinds[i % kinds.len()], format!("line {}", i)))
            .collect_vec();
        let expected = lines.iter().map(|l| l.content.clone()).collect_vec();

        let mut js = MockLanguageExecutor::new();
        js.expect_execute()
            .returning(move |_, _| ExecutionResult::completed(lines.clone(), 9));
        let service = CodeRunnerService::with_executors(defaults(), Arc::new(js), no_python());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service.set_output_callback(Some(Arc::new(move |line: &OutputLine| {
            sink.lock().unwrap().push(line.content.clone());
        })));

        let result = service
            .execute("noisy()", "javascript", PartialExecutionConfig::default())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(
            result.outputs.iter().map(|l| l.content.clone()).collect_vec(),
            expected
        );
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_cleared_callback_is_not_invoked() {
        let mut js = MockLanguageExecutor::new();
        js.expect_execute().returning(|_, _| {
            ExecutionResult::completed(vec![OutputLine::now(OutputKind::Log, "hi")], 1)
        });
        let service = CodeRunnerService::with_executors(defaults(), Arc::new(js), no_python());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        service.set_output_callback(Some(Arc::new(move |_: &OutputLine| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        service.set_output_callback(None);

        service
            .execute("log()", "javascript", PartialExecutionConfig::default())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_noop() {
        let mut js = MockLanguageExecutor::new();
        js.expect_stop().never();
        js.expect_execute()
            .returning(|_, _| ExecutionResult::completed(Vec::new(), 1));
        let service = CodeRunnerService::with_executors(defaults(), Arc::new(js), no_python());

        service.stop();
        service
            .execute("1", "javascript", PartialExecutionConfig::default())
            .await
            .unwrap();
        service.stop();
    }

    #[tokio::test]
    async fn test_usage_errors_never_reach_an_executor() {
        let mut js = MockLanguageExecutor::new();
        js.expect_execute().never();
        let service = CodeRunnerService::with_executors(defaults(), Arc::new(js), no_python());

        let unsupported = service
            .execute("puts 1", "ruby", PartialExecutionConfig::default())
            .await;
        let invalid = service
            .execute(
                "1",
                "javascript",
                PartialExecutionConfig::default().with_max_iterations(0),
            )
            .await;

        assert!(matches!(unsupported, Err(RunnerError::UnsupportedLanguage(lang)) if lang == "ruby"));
        assert!(matches!(invalid, Err(RunnerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_dispose_drops_python_executor() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut js = MockLanguageExecutor::new();
        js.expect_stop().never();
        let service = CodeRunnerService::with_executors(
            defaults(),
            Arc::new(js),
            counting_python_factory(count.clone()),
        );
        service.preload_python().await;
        assert!(service.is_python_ready());

        service.dispose();

        assert!(!service.is_python_ready());
        let err = service
            .execute("pass", "python", PartialExecutionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, RunnerError::PythonNotLoaded);

        service.preload_python().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
