// ── Controller abstraction ──
//
// Owns the network worker: a single task that holds the `Manager` and
// the NCP link and processes, one at a time, NCP events, operator
// commands and the periodic sweep. Everything else talks to it through
// channels.

use std::sync::Arc;
use std::time::Instant;

use nwmng_ncp::{Event, NcpLink, Request, ResultCode};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::ManagerSettings;
use crate::error::CoreError;
use crate::manager::{Manager, ManagerState, Notice, Stats};
use crate::model::Node;
use crate::stream::EntityStream;

const COMMAND_CHANNEL_SIZE: usize = 64;

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ── Worker ───────────────────────────────────────────────────────────

/// Everything the worker task owns. Handed back when the task ends so a
/// restart can pick up where it left off.
struct Worker {
    manager: Manager,
    link: Box<dyn NcpLink>,
    events: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::Receiver<CommandEnvelope>,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken, settings: ManagerSettings) -> Self {
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            res = self.startup(&settings) => Some(res),
        };
        match started {
            None => return self,
            Some(Err(e)) => self.manager.fail(&e),
            Some(Ok(())) => {}
        }

        let mut sweep = tokio::time::interval(settings.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.events.recv(), if events_open => {
                    let Some(event) = event else {
                        warn!("NCP event channel closed");
                        events_open = false;
                        continue;
                    };
                    if !self.manager.handle_event(self.link.as_mut(), &event, now()) {
                        debug!(id = %event.id(), "event not handled");
                    }
                }
                envelope = self.commands.recv() => {
                    let Some(envelope) = envelope else { break };
                    let result = self.manager.apply(self.link.as_mut(), envelope.command, now());
                    let _ = envelope.response_tx.send(result);
                }
                _ = sweep.tick() => self.manager.tick(self.link.as_mut(), now()),
            }
        }
        debug!("worker stopped");
        self
    }

    /// Ask the NCP to start and wait, bounded, for its `Initialized` event.
    async fn startup(&mut self, settings: &ManagerSettings) -> Result<(), CoreError> {
        let ack = self.link.request(&Request::ProvInit)?;
        match ack.result {
            ResultCode::Success | ResultCode::AlreadyInitialized => {}
            code => return Err(CoreError::rejected(Request::ProvInit.name(), code)),
        }

        let events = &mut self.events;
        let wait = async {
            while let Some(event) = events.recv().await {
                if matches!(event, Event::Initialized { .. }) {
                    return Some(event);
                }
                debug!(id = %event.id(), "event before initialisation dropped");
            }
            None
        };
        let event = tokio::time::timeout(settings.init_timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                what: "NCP initialized event".into(),
                timeout_ms: u64::try_from(settings.init_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .ok_or_else(|| CoreError::Ncp(nwmng_ncp::Error::Closed))?;

        self.manager.handle_event(self.link.as_mut(), &event, now());
        Ok(())
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the worker task and
/// exposes its state through watch snapshots and a notice broadcast.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    settings: ManagerSettings,
    command_tx: mpsc::Sender<CommandEnvelope>,
    state: watch::Receiver<ManagerState>,
    stats: watch::Receiver<Stats>,
    notices: broadcast::Sender<Notice>,
    nodes: EntityStream<Node>,
    unprovisioned: EntityStream<Node>,
    backlog: EntityStream<Node>,
    cancel: CancellationToken,
    /// Child token for the current worker run, replaced on restart.
    cancel_child: Mutex<CancellationToken>,
    /// The worker while it is not running.
    parked: Mutex<Option<Worker>>,
    task: Mutex<Option<JoinHandle<Worker>>>,
}

impl Controller {
    /// Wrap a manager and its NCP link. Does NOT start the worker:
    /// call [`start()`](Self::start).
    pub fn new(
        manager: Manager,
        link: impl NcpLink + 'static,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        let inner = ControllerInner {
            settings: manager.settings().clone(),
            command_tx,
            state: manager.subscribe_state(),
            stats: manager.subscribe_stats(),
            notices: manager.notice_sender(),
            nodes: manager.db().nodes_stream(),
            unprovisioned: manager.db().unprovisioned_stream(),
            backlog: manager.db().backlog_stream(),
            cancel,
            cancel_child: Mutex::new(cancel_child),
            parked: Mutex::new(Some(Worker {
                manager,
                link: Box::new(link),
                events,
                commands,
            })),
            task: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the worker, run the network bootstrap and wait until the
    /// manager is ready (or has failed).
    pub async fn start(&self) -> Result<(), CoreError> {
        let worker = self
            .inner
            .parked
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::state("worker already running"))?;

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let settings = self.inner.settings.clone();
        *self.inner.task.lock().await = Some(tokio::spawn(worker.run(child, settings)));
        info!("worker started");
        self.wait_ready().await
    }

    /// Wait until the manager leaves [`ManagerState::Starting`].
    pub async fn wait_ready(&self) -> Result<(), CoreError> {
        let mut rx = self.inner.state.clone();
        let state = rx
            .wait_for(|s| *s != ManagerState::Starting)
            .await
            .map_err(|_| CoreError::WorkerStopped)?
            .clone();
        match state {
            ManagerState::Failed { reason } => Err(CoreError::State {
                message: format!("bootstrap failed: {reason}"),
            }),
            _ => Ok(()),
        }
    }

    /// Stop the worker between two steps and hand its state back.
    async fn stop(&self) -> Result<Worker, CoreError> {
        self.inner.cancel_child.lock().await.cancel();
        let handle = self
            .inner
            .task
            .lock()
            .await
            .take()
            .ok_or(CoreError::WorkerStopped)?;
        handle
            .await
            .map_err(|e| CoreError::Unspecified(format!("worker task failed: {e}")))
    }

    /// Cooperative restart: stop the worker, forget in-flight sessions,
    /// and run startup again against the same database.
    pub async fn restart(&self) -> Result<(), CoreError> {
        let mut worker = self.stop().await?;
        worker.manager.reset_session();
        *self.inner.parked.lock().await = Some(worker);
        info!("restarting worker");
        self.start().await
    }

    /// Stop the worker for good.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        match self.stop().await {
            Ok(worker) => *self.inner.parked.lock().await = Some(worker),
            Err(e) => debug!(error = %e, "shutdown without running worker"),
        }
    }

    // ── Command execution ────────────────────────────────────────────

    /// Send a command to the worker and await the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if self.inner.task.lock().await.is_none() {
            return Err(CoreError::WorkerStopped);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::WorkerStopped)?;

        rx.await.map_err(|_| CoreError::WorkerStopped)?
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.clone()
    }

    pub fn stats(&self) -> watch::Receiver<Stats> {
        self.inner.stats.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn nodes(&self) -> EntityStream<Node> {
        self.inner.nodes.clone()
    }

    pub fn unprovisioned(&self) -> EntityStream<Node> {
        self.inner.unprovisioned.clone()
    }

    pub fn backlog(&self) -> EntityStream<Node> {
        self.inner.backlog.clone()
    }
}
