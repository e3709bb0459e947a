pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_ITERATIONS: u64 = 100_000;
pub const DEFAULT_PYTHON_COLD_START_GRACE_MS: u64 = 30_000;

pub const DEFAULT_NODE_PATH: &str = "node";
pub const DEFAULT_PYTHON_PATH: &str = "python3";

/// Exact content of the `info` line the Python worker emits once its
/// interpreter is initialized.
pub const PYTHON_LOADED_SENTINEL: &str = "Python runtime loaded";

pub const WORKER_FAULT_FALLBACK: &str = "Worker terminated unexpectedly";
pub const EXECUTION_STOPPED_MSG: &str = "Execution stopped";

/// Upper bound on the stderr tail attached to worker exit faults.
pub const WORKER_STDERR_TAIL_BYTES: usize = 4 * 1024;
