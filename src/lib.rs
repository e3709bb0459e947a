pub mod config;
pub mod constants;
pub mod core;
pub mod executors;
pub mod native;
pub mod stubs;
pub mod transform;


pub use crate::config::{RunnerSettings, SettingsError};
pub use crate::core::domain::{
    ExecutionConfig, ExecutionOutcome, ExecutionResult, Language, OutputKind, OutputLine,
    PartialExecutionConfig,
};
pub use crate::core::errors::RunnerError;
pub use crate::core::service::{CodeRunnerService, OutputCallback};
