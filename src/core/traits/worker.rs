use tokio::sync::{mpsc, oneshot};

use crate::core::errors::WorkerError;
use crate::core::protocol::{HostMessage, WorkerEvent};

/// Creates one isolated worker per call.
pub trait WorkerSpawner: std::fmt::Debug + Send + Sync {
    fn spawn(&self) -> Result<WorkerHandle, WorkerError>;
}

/// Host-side view of a live worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub control: WorkerControl,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Worker-side ends of the channels behind a [`WorkerHandle`].
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub host_rx: mpsc::UnboundedReceiver<HostMessage>,
    pub events_tx: mpsc::UnboundedSender<WorkerEvent>,
    /// Resolves when the host terminates the worker or drops its control.
    pub kill_rx: oneshot::Receiver<()>,
}

impl WorkerHandle {
    pub fn pair() -> (WorkerHandle, WorkerEndpoint) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        (
            WorkerHandle {
                control: WorkerControl {
                    host_tx,
                    kill_tx: Some(kill_tx),
                },
                events,
            },
            WorkerEndpoint {
                host_rx,
                events_tx,
                kill_rx,
            },
        )
    }
}

#[derive(Debug)]
pub struct WorkerControl {
    host_tx: mpsc::UnboundedSender<HostMessage>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerControl {
    pub fn sender(&self) -> HostSender {
        HostSender(self.host_tx.clone())
    }

    /// Hard termination. Never waits for the worker to acknowledge.
    pub fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

impl Drop for WorkerControl {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[derive(Clone, Debug)]
pub struct HostSender(mpsc::UnboundedSender<HostMessage>);

impl HostSender {
    pub fn send(&self, msg: HostMessage) -> Result<(), WorkerError> {
        self.0.send(msg).map_err(|_| WorkerError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropping_control_signals_kill() {
        let (handle, endpoint) = WorkerHandle::pair();

        drop(handle);

        assert_eq!(endpoint.kill_rx.await, Ok(()));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (mut handle, endpoint) = WorkerHandle::pair();

        handle.control.terminate();
        handle.control.terminate();

        assert_eq!(endpoint.kill_rx.await, Ok(()));
    }

    #[tokio::test]
    async fn test_sender_fails_once_worker_is_gone() {
        let (handle, endpoint) = WorkerHandle::pair();
        let sender = handle.control.sender();

        drop(endpoint);

        let result = sender.send(HostMessage::Run {
            code: String::new(),
            config: crate::core::domain::ExecutionConfig::new(1, 1).unwrap(),
        });
        assert!(matches!(result, Err(WorkerError::Disconnected)));
    }
}
