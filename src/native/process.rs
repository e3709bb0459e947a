use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::constants::{WORKER_FAULT_FALLBACK, WORKER_STDERR_TAIL_BYTES};
use crate::core::domain::Language;
use crate::core::errors::WorkerError;
use crate::core::protocol::{HostMessage, WorkerEvent, WorkerMessage};
use crate::core::traits::worker::{WorkerEndpoint, WorkerHandle, WorkerSpawner};

const JAVASCRIPT_WORKER: &str = include_str!("worker.js");
const PYTHON_WORKER: &str = include_str!("worker.py");

/// Spawns one interpreter process per worker. The process starts with an
/// empty environment and speaks the worker protocol over stdin/stdout.
#[derive(Clone, Debug)]
pub struct ProcessSpawner {
    language: Language,
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn javascript<T: AsRef<Path>>(node_path: T) -> Self {
        ProcessSpawner {
            language: Language::JavaScript,
            program: node_path.as_ref().into(),
            args: vec!["-e".to_string(), JAVASCRIPT_WORKER.to_string()],
        }
    }

    pub fn python<T: AsRef<Path>>(python_path: T) -> Self {
        ProcessSpawner {
            language: Language::Python,
            program: python_path.as_ref().into(),
            args: vec![
                "-I".to_string(),
                "-u".to_string(),
                "-c".to_string(),
                PYTHON_WORKER.to_string(),
            ],
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    #[tracing::instrument(skip(self), fields(language = %self.language, program = %self.program.display()))]
    fn spawn(&self) -> Result<WorkerHandle, WorkerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!(pid = ?child.id(), "Worker process started");

        let (handle, endpoint) = WorkerHandle::pair();
        let WorkerEndpoint {
            host_rx,
            events_tx,
            kill_rx,
        } = endpoint;

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(forward_host_messages(stdin, host_rx));
        }
        tokio::spawn(supervise(child, events_tx, kill_rx));

        Ok(handle)
    }
}

async fn forward_host_messages(
    mut stdin: ChildStdin,
    mut host_rx: mpsc::UnboundedReceiver<HostMessage>,
) {
    while let Some(msg) = host_rx.recv().await {
        let line = match msg.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode host message: {}", e);
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!("Worker stdin closed: {}", e);
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

/// Relays stdout protocol lines until the process exits or the host kills it.
async fn supervise(
    mut child: Child,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    mut kill_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));
    let Some(stdout) = child.stdout.take() else {
        let _ = events_tx.send(WorkerEvent::Fault("worker stdout unavailable".to_string()));
        let _ = child.kill().await;
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            _ = &mut kill_rx => {
                tracing::debug!(pid = ?child.id(), "Killing worker process");
                let _ = child.kill().await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match WorkerMessage::decode(&line) {
                    Ok(msg) => {
                        tracing::trace!(?msg, "Worker message");
                        if events_tx.send(WorkerEvent::Message(msg)).is_err() {
                            let _ = child.kill().await;
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(WorkerEvent::Fault(format!(
                            "Malformed worker message ({}): {}",
                            e, line
                        )));
                        let _ = child.kill().await;
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    let _ = events_tx.send(WorkerEvent::Fault(format!(
                        "Failed to read worker output: {}",
                        e
                    )));
                    let _ = child.kill().await;
                    return;
                }
            },
        }
    }

    // stdout closed: the process is exiting on its own.
    let status = tokio::select! {
        _ = &mut kill_rx => {
            let _ = child.kill().await;
            return;
        }
        status = child.wait() => status,
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let msg = match (status, stderr.trim()) {
        (Ok(status), "") => format!("{} ({})", WORKER_FAULT_FALLBACK, status),
        (Ok(status), stderr) => format!("{} ({}): {}", WORKER_FAULT_FALLBACK, status, stderr),
        (Err(e), _) => format!("{}: {}", WORKER_FAULT_FALLBACK, e),
    };
    let _ = events_tx.send(WorkerEvent::Fault(msg));
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if stderr.read_to_end(&mut buf).await.is_err() {
        return String::new();
    }
    let start = buf.len().saturating_sub(WORKER_STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_interpreter_fails_to_spawn() {
        let spawner = ProcessSpawner::javascript("/nonexistent/node");

        assert!(matches!(spawner.spawn(), Err(WorkerError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_non_protocol_output_is_a_fault() {
        let spawner = ProcessSpawner {
            language: Language::JavaScript,
            program: "/bin/sh".into(),
            args: vec!["-c".to_string(), "echo not-json".to_string()],
        };
        let Ok(mut handle) = spawner.spawn() else {
            return;
        };

        let event = handle.events.recv().await;

        assert!(matches!(event, Some(WorkerEvent::Fault(msg)) if msg.contains("not-json")));
    }

    #[tokio::test]
    async fn test_early_exit_is_a_fault_with_stderr() {
        let spawner = ProcessSpawner {
            language: Language::Python,
            program: "/bin/sh".into(),
            args: vec![
                "-c".to_string(),
                "echo '{\"type\":\"ready\"}'; echo oops >&2; exit 3".to_string(),
            ],
        };
        let Ok(mut handle) = spawner.spawn() else {
            return;
        };

        assert_eq!(
            handle.events.recv().await,
            Some(WorkerEvent::Message(WorkerMessage::Ready))
        );
        let fault = handle.events.recv().await;
        assert!(matches!(fault, Some(WorkerEvent::Fault(msg)) if msg.contains("oops")));
    }
}
