use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coderunner_sandbox::{
    CodeRunnerService, ExecutionResult, Language, OutputKind, OutputLine, PartialExecutionConfig,
    RunnerSettings,
};

/// Run a JavaScript or Python file in an isolated worker process.
#[derive(Debug, Parser)]
#[command(name = "coderunner", version)]
struct Cli {
    /// Source file to execute
    file: PathBuf,

    #[arg(short, long)]
    language: Language,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    max_iterations: Option<u64>,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the execution result as JSON instead of streaming lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(result) if result.success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

#[tracing::instrument]
async fn run(cli: Cli) -> Result<ExecutionResult, Box<dyn std::error::Error>> {
    let settings = match &cli.config {
        Some(path) => RunnerSettings::load(path)?,
        None => RunnerSettings::default(),
    }
    .with_env_overrides()?;
    let code = std::fs::read_to_string(&cli.file)?;

    let service = CodeRunnerService::new(&settings)?;
    if cli.language == Language::Python {
        service.preload_python().await;
    }
    if !cli.json {
        service.set_output_callback(Some(Arc::new(print_line)));
    }

    let mut overrides = PartialExecutionConfig::default();
    if let Some(timeout_ms) = cli.timeout_ms {
        overrides = overrides.with_timeout_ms(timeout_ms);
    }
    if let Some(max_iterations) = cli.max_iterations {
        overrides = overrides.with_max_iterations(max_iterations);
    }

    let result = service
        .execute(&code, cli.language.as_str(), overrides)
        .await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        eprintln!(
            "-- {} in {}ms ({:?})",
            if result.success { "ok" } else { "failed" },
            result.execution_time_ms,
            result.outcome
        );
    }
    service.dispose();

    Ok(result)
}

fn print_line(line: &OutputLine) {
    match line.kind {
        OutputKind::Log | OutputKind::Info => println!("{}", line.content),
        OutputKind::Result => println!("=> {}", line.content),
        OutputKind::Warn => eprintln!("warning: {}", line.content),
        OutputKind::Error => eprintln!("error: {}", line.content),
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
