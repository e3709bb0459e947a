use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::EXECUTION_STOPPED_MSG;
use crate::core::errors::RunnerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::JavaScript),
            "python" | "py" => Ok(Language::Python),
            _ => Err(RunnerError::UnsupportedLanguage(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub timeout_ms: u64,
    pub max_iterations: u64,
}

impl ExecutionConfig {
    pub fn new(timeout_ms: u64, max_iterations: u64) -> Result<Self, RunnerError> {
        if timeout_ms == 0 {
            return Err(RunnerError::InvalidConfig(
                "timeoutMs must be positive".to_string(),
            ));
        }
        if max_iterations == 0 {
            return Err(RunnerError::InvalidConfig(
                "maxIterations must be positive".to_string(),
            ));
        }
        Ok(Self {
            timeout_ms,
            max_iterations,
        })
    }

    /// Returns a new config with every field set in `overrides` taking
    /// precedence over `self`.
    pub fn merge(&self, overrides: &PartialExecutionConfig) -> Result<Self, RunnerError> {
        Self::new(
            overrides.timeout_ms.unwrap_or(self.timeout_ms),
            overrides.max_iterations.unwrap_or(self.max_iterations),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialExecutionConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

impl PartialExecutionConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Warn,
    Error,
    Info,
    Result,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl OutputLine {
    pub fn now(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutputKind::Error
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    TimedOut,
    Faulted,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub outputs: Vec<OutputLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    pub fn completed(outputs: Vec<OutputLine>, execution_time_ms: u64) -> Self {
        Self::from_outputs(outputs, execution_time_ms, ExecutionOutcome::Completed)
    }

    pub fn timed_out(mut outputs: Vec<OutputLine>, timeout_ms: u64) -> Self {
        outputs.push(OutputLine::now(
            OutputKind::Error,
            format!("Execution timed out after {}ms", timeout_ms),
        ));
        Self::from_outputs(outputs, timeout_ms, ExecutionOutcome::TimedOut)
    }

    pub fn faulted(mut outputs: Vec<OutputLine>, msg: impl Into<String>) -> Self {
        outputs.push(OutputLine::now(OutputKind::Error, msg));
        Self::from_outputs(outputs, 0, ExecutionOutcome::Faulted)
    }

    /// Output collected before the stop is discarded.
    pub fn stopped(elapsed_ms: u64) -> Self {
        Self::from_outputs(
            vec![OutputLine::now(OutputKind::Error, EXECUTION_STOPPED_MSG)],
            elapsed_ms,
            ExecutionOutcome::Stopped,
        )
    }

    fn from_outputs(
        outputs: Vec<OutputLine>,
        execution_time_ms: u64,
        outcome: ExecutionOutcome,
    ) -> Self {
        let error = outputs
            .iter()
            .find(|line| line.is_error())
            .map(|line| line.content.clone());

        Self {
            success: error.is_none(),
            outputs,
            error,
            execution_time_ms,
            outcome,
        }
    }
}
