use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::domain::{OutputKind, OutputLine};
use crate::core::errors::WorkerError;
use crate::core::protocol::{HostMessage, WorkerEvent, WorkerMessage};
use crate::core::traits::worker::{WorkerEndpoint, WorkerHandle, WorkerSpawner};

#[derive(Clone, Debug)]
pub enum WorkerStep {
    Output(OutputLine),
    Error(String),
    Complete(u64),
    Delay(Duration),
    /// Reports a worker-level fault and exits.
    Crash(String),
    /// Runs forever, like an unguarded infinite loop.
    Hang,
}

impl WorkerStep {
    pub fn output(kind: OutputKind, content: &str) -> Self {
        WorkerStep::Output(OutputLine::now(kind, content))
    }
}

/// In-process worker that replays a script once it receives `run`.
///
/// It talks to the host only through the worker channels, so it exercises
/// the same handshake as a process worker.
#[derive(Debug)]
pub struct WorkerStub {
    steps: Vec<WorkerStep>,
    ready_delay: Duration,
    spawn_error: Option<String>,
    received: Arc<Mutex<Vec<String>>>,
    spawns: AtomicUsize,
    kills: Arc<AtomicUsize>,
}

impl WorkerStub {
    pub fn new(steps: Vec<WorkerStep>) -> Self {
        Self {
            steps,
            ready_delay: Duration::ZERO,
            spawn_error: None,
            received: Arc::new(Mutex::new(Vec::new())),
            spawns: AtomicUsize::new(0),
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_spawn(msg: &str) -> Self {
        Self {
            spawn_error: Some(msg.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Code of every `run` message received, in order.
    pub fn received_code(&self) -> Vec<String> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn killed_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for WorkerStub {
    #[tracing::instrument(skip(self))]
    fn spawn(&self) -> Result<WorkerHandle, WorkerError> {
        if let Some(msg) = &self.spawn_error {
            return Err(WorkerError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                msg.clone(),
            )));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let (handle, endpoint) = WorkerHandle::pair();
        tokio::spawn(play(
            endpoint,
            self.steps.clone(),
            self.ready_delay,
            self.received.clone(),
            self.kills.clone(),
        ));

        Ok(handle)
    }
}

async fn play(
    endpoint: WorkerEndpoint,
    steps: Vec<WorkerStep>,
    ready_delay: Duration,
    received: Arc<Mutex<Vec<String>>>,
    kills: Arc<AtomicUsize>,
) {
    let WorkerEndpoint {
        mut host_rx,
        events_tx,
        mut kill_rx,
    } = endpoint;
    let send = |msg: WorkerMessage| {
        let _ = events_tx.send(WorkerEvent::Message(msg));
    };

    let script = async {
        tokio::time::sleep(ready_delay).await;
        send(WorkerMessage::Ready);

        let Some(HostMessage::Run { code, .. }) = host_rx.recv().await else {
            return;
        };
        if let Ok(mut received) = received.lock() {
            received.push(code);
        }

        for step in steps {
            match step {
                WorkerStep::Output(data) => send(WorkerMessage::Output { data }),
                WorkerStep::Error(error) => send(WorkerMessage::Error { error }),
                WorkerStep::Complete(execution_time_ms) => {
                    send(WorkerMessage::Complete { execution_time_ms })
                }
                WorkerStep::Delay(delay) => tokio::time::sleep(delay).await,
                WorkerStep::Crash(msg) => {
                    let _ = events_tx.send(WorkerEvent::Fault(msg));
                    return;
                }
                WorkerStep::Hang => std::future::pending::<()>().await,
            }
        }

        // A finished worker idles until the host discards it.
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = &mut kill_rx => {
            kills.fetch_add(1, Ordering::SeqCst);
        }
        _ = script => {}
    }
}
