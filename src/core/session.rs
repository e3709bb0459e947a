//! Execution session lifecycle shared by the language executors.
//!
//! A session runs `Idle -> Spawning -> AwaitingReady -> Running ->
//! Completing -> Idle`, or aborts through `TimedOut`, `Faulted` or `Stopped`.
//! The supervisor holds at most one session; installing a new one kills the
//! previous worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::constants::WORKER_FAULT_FALLBACK;
use crate::core::domain::{ExecutionConfig, ExecutionResult, OutputKind, OutputLine};
use crate::core::protocol::{HostMessage, WorkerEvent, WorkerMessage};
use crate::core::traits::worker::{WorkerControl, WorkerSpawner};
use crate::transform::SourceTransform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Spawning,
    AwaitingReady,
    Running,
    Completing,
    TimedOut,
    Faulted,
    Stopped,
}

pub type OutputHook<'a> = &'a (dyn Fn(&OutputLine) + Send + Sync);

pub struct SessionRequest<'a> {
    pub code: &'a str,
    pub config: &'a ExecutionConfig,
    /// Budget for the whole session, spawn included.
    pub timeout: Duration,
    pub transform: Option<&'a dyn SourceTransform>,
    pub on_output: Option<OutputHook<'a>>,
}

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    state: SessionState,
    control: Option<WorkerControl>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ActiveSession {
    fn teardown(&mut self) {
        if let Some(control) = self.control.as_mut() {
            control.terminate();
        }
    }
}

#[derive(Debug)]
pub struct WorkerSupervisor {
    spawner: Arc<dyn WorkerSpawner>,
    active: Mutex<Option<ActiveSession>>,
    ready: AtomicBool,
}

enum Outcome {
    Completed(u64),
    TimedOut,
    Faulted(String),
    Stopped,
}

/// Tears the session down on every exit path, including a dropped future.
struct SessionGuard<'a> {
    supervisor: &'a WorkerSupervisor,
    id: Uuid,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.release(self.id);
    }
}

impl WorkerSupervisor {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            active: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// True once any session has completed the ready handshake.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.lock_active()
            .as_ref()
            .map_or(SessionState::Idle, |session| session.state)
    }

    /// Kills the active worker. No-op while idle.
    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        let Some(mut session) = self.lock_active().take() else {
            return;
        };
        tracing::info!(session = %session.id, state = ?session.state, "Stopping execution");
        session.state = SessionState::Stopped;
        session.teardown();
        if let Some(stop_tx) = session.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    #[tracing::instrument(skip_all, fields(timeout_ms = request.timeout.as_millis() as u64))]
    pub async fn run(&self, request: SessionRequest<'_>) -> ExecutionResult {
        let id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + request.timeout;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        self.install(ActiveSession {
            id,
            state: SessionState::Spawning,
            control: None,
            stop_tx: Some(stop_tx),
        });
        let _guard = SessionGuard {
            supervisor: self,
            id,
        };
        tracing::debug!(session = %id, "Spawning worker");

        let handle = match self.spawner.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(session = %id, "Failed to spawn worker: {}", e);
                self.transition(id, SessionState::Faulted);
                return ExecutionResult::faulted(Vec::new(), e.to_string());
            }
        };

        let host_tx = handle.control.sender();
        let mut events = handle.events;
        if !self.attach(id, handle.control) {
            return ExecutionResult::stopped(elapsed_ms(started));
        }
        self.transition(id, SessionState::AwaitingReady);

        let mut outputs: Vec<OutputLine> = Vec::new();
        let mut awaiting_ready = true;
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break Outcome::Stopped,
                event = events.recv() => match event {
                    Some(WorkerEvent::Message(WorkerMessage::Ready)) => {
                        if !awaiting_ready {
                            tracing::debug!(session = %id, "Ignoring repeated ready");
                            continue;
                        }
                        awaiting_ready = false;
                        self.ready.store(true, Ordering::SeqCst);

                        let code = match request.transform {
                            Some(transform) => transform.transform(request.code),
                            None => request.code.to_string(),
                        };
                        let run = HostMessage::Run {
                            code,
                            config: *request.config,
                        };
                        if let Err(e) = host_tx.send(run) {
                            break Outcome::Faulted(e.to_string());
                        }
                        self.transition(id, SessionState::Running);
                    }
                    Some(WorkerEvent::Message(WorkerMessage::Output { data })) => {
                        if let Some(on_output) = request.on_output {
                            on_output(&data);
                        }
                        outputs.push(data);
                    }
                    Some(WorkerEvent::Message(WorkerMessage::Error { error })) => {
                        outputs.push(OutputLine::now(OutputKind::Error, error));
                    }
                    Some(WorkerEvent::Message(WorkerMessage::Complete { execution_time_ms })) => {
                        break Outcome::Completed(execution_time_ms);
                    }
                    Some(WorkerEvent::Fault(msg)) => break Outcome::Faulted(msg),
                    None => break Outcome::Faulted(WORKER_FAULT_FALLBACK.to_string()),
                },
                _ = &mut timer => break Outcome::TimedOut,
            }
        };

        match outcome {
            Outcome::Completed(execution_time_ms) => {
                self.transition(id, SessionState::Completing);
                tracing::debug!(session = %id, execution_time_ms, lines = outputs.len(), "Execution completed");
                ExecutionResult::completed(outputs, execution_time_ms)
            }
            Outcome::TimedOut => {
                self.transition(id, SessionState::TimedOut);
                let timeout_ms = request.timeout.as_millis() as u64;
                tracing::info!(session = %id, timeout_ms, "Execution timed out");
                ExecutionResult::timed_out(outputs, timeout_ms)
            }
            Outcome::Faulted(msg) => {
                self.transition(id, SessionState::Faulted);
                let msg = if msg.trim().is_empty() {
                    WORKER_FAULT_FALLBACK.to_string()
                } else {
                    msg
                };
                tracing::warn!(session = %id, "Worker fault: {}", msg);
                ExecutionResult::faulted(outputs, msg)
            }
            Outcome::Stopped => {
                tracing::debug!(session = %id, discarded = outputs.len(), "Execution stopped");
                ExecutionResult::stopped(elapsed_ms(started))
            }
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // The guarded data stays consistent even if a holder panicked.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn install(&self, session: ActiveSession) {
        let previous = self.lock_active().replace(session);
        if let Some(mut previous) = previous {
            tracing::info!(session = %previous.id, "Tearing down previous session");
            previous.teardown();
            if let Some(stop_tx) = previous.stop_tx.take() {
                let _ = stop_tx.send(());
            }
        }
    }

    /// Returns false when the session was stopped or replaced while spawning.
    fn attach(&self, id: Uuid, mut control: WorkerControl) -> bool {
        let mut active = self.lock_active();
        match active.as_mut() {
            Some(session) if session.id == id => {
                session.control = Some(control);
                true
            }
            _ => {
                control.terminate();
                false
            }
        }
    }

    fn transition(&self, id: Uuid, state: SessionState) {
        if let Some(session) = self.lock_active().as_mut().filter(|s| s.id == id) {
            tracing::debug!(session = %id, from = ?session.state, to = ?state, "Session state changed");
            session.state = state;
        }
    }

    fn release(&self, id: Uuid) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|session| session.id == id) {
            if let Some(mut session) = active.take() {
                session.teardown();
                tracing::debug!(session = %id, "Session released");
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
