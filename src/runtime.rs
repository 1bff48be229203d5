//! Per-session actor
//!
//! Each session runs in its own tokio task that owns the [`Session`] and
//! applies commands one at a time. Timer ticks and optimize outcomes come back
//! through the same channel, so the state is never touched concurrently.
//! Snapshots are published on a broadcast channel after every change.

use crate::error::{OptimizeError, SessionError};
use crate::iteration::{ReplayLog, ValidatedResponse};
use crate::optimizer::{OptimizationParameters, Optimizer};
use crate::playback::{PlaybackTimer, TickToken, TokioScheduler};
use crate::render::{render_svg, RenderOptions};
use crate::scenario::ScenarioId;
use crate::session::{Event, OptimizeJob, Session, SessionSnapshot};
use crate::NodeId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

const SNAPSHOT_BUFFER: usize = 64;

/// A user action on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Switch scenario. `node_count` defaults to the current count.
    ChangeScenario {
        scenario: ScenarioId,
        node_count: Option<usize>,
    },
    /// Regenerate nodes for the current scenario
    Reset,
    SetParams(OptimizationParameters),
    SelectStartNode(NodeId),
    Optimize,
    TogglePlayback,
    Skip,
    DismissError,
}

enum Command {
    Act {
        action: Action,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Export(oneshot::Sender<Option<ReplayLog>>),
    Render(oneshot::Sender<String>),
    Tick(TickToken),
    Resolved {
        tag: Uuid,
        outcome: Result<ValidatedResponse, OptimizeError>,
        duration: Duration,
    },
    Shutdown,
}

/// How to start a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub scenario: ScenarioId,
    pub node_count: usize,
    pub tick_interval: Duration,
    /// Fixed seed for node generation; entropy when absent
    pub seed: Option<u64>,
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionSnapshot>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Apply an action and return the resulting snapshot.
    pub async fn act(&self, action: Action) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Act { action, reply })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// The loaded result as a replayable log, if any.
    pub async fn export(&self) -> Result<Option<ReplayLog>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Export(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// SVG of the current frame.
    pub async fn render_svg(&self) -> Result<String, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Render(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Snapshots published after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    /// Stop the actor. Its timer and in-flight request are dropped.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Open snapshot streams.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Closed)
    }
}

/// Create a session and spawn its actor. Must run inside a tokio runtime.
pub fn spawn_session(
    options: SessionOptions,
    optimizer: Arc<dyn Optimizer>,
) -> Result<SessionHandle, SessionError> {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(SNAPSHOT_BUFFER);

    let weak = tx.downgrade();
    let scheduler = TokioScheduler::new(move |token| {
        if let Some(tx) = weak.upgrade() {
            let _ = tx.send(Command::Tick(token));
        }
    });
    let timer = PlaybackTimer::new(scheduler, options.tick_interval);

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let session = Session::new(options.scenario, options.node_count, &mut rng, timer)?;

    info!(session_id = %id, scenario = %options.scenario, "Session created");

    let actor = SessionActor {
        id,
        session,
        rng,
        optimizer,
        events: events.clone(),
        tx: tx.downgrade(),
        in_flight: None,
    };
    tokio::spawn(actor.run(rx));

    Ok(SessionHandle { id, tx, events })
}

struct SessionActor {
    id: Uuid,
    session: Session<TokioScheduler>,
    rng: StdRng,
    optimizer: Arc<dyn Optimizer>,
    events: broadcast::Sender<SessionSnapshot>,
    tx: mpsc::WeakUnboundedSender<Command>,
    in_flight: Option<JoinHandle<()>>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Act { action, reply } => {
                    let result = self.apply(action);
                    if result.is_ok() {
                        self.publish();
                    }
                    let _ = reply.send(result.map(|_| self.snapshot()));
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Export(reply) => {
                    let _ = reply.send(self.session.state().replay_log());
                }
                Command::Render(reply) => {
                    let _ = reply.send(self.render());
                }
                Command::Tick(token) => {
                    if self.session.on_tick(token) {
                        self.publish();
                    }
                }
                Command::Resolved {
                    tag,
                    outcome,
                    duration,
                } => {
                    self.session.resolve(tag, outcome, duration);
                    self.publish();
                }
                Command::Shutdown => break,
            }
        }

        self.abort_in_flight();
        info!(session_id = %self.id, "Session closed");
    }

    fn apply(&mut self, action: Action) -> Result<(), SessionError> {
        match action {
            Action::ChangeScenario {
                scenario,
                node_count,
            } => {
                let count = node_count.unwrap_or(self.session.state().node_count);
                self.session.change_topology(scenario, count, &mut self.rng)?;
                self.abort_in_flight();
            }
            Action::Reset => {
                let state = self.session.state();
                let (scenario, count) = (state.scenario, state.node_count);
                self.session.change_topology(scenario, count, &mut self.rng)?;
                self.abort_in_flight();
            }
            Action::SetParams(params) => {
                self.session.dispatch(Event::ParamsChanged(params))?;
            }
            Action::SelectStartNode(id) => {
                self.session.dispatch(Event::StartNodeSelected(id))?;
            }
            Action::Optimize => {
                let job = self.session.request_optimize()?;
                self.start_job(job);
            }
            Action::TogglePlayback => {
                self.session.dispatch(Event::PlayToggled)?;
            }
            Action::Skip => {
                self.session.dispatch(Event::SkipRequested)?;
            }
            Action::DismissError => {
                self.session.dispatch(Event::ErrorDismissed)?;
            }
        }
        Ok(())
    }

    fn start_job(&mut self, job: OptimizeJob) {
        let OptimizeJob { tag, request } = job;
        let optimizer = Arc::clone(&self.optimizer);
        let tx = self.tx.clone();
        let session_id = self.id;

        info!(session_id = %session_id, request_tag = %tag, nodes = request.nodes.len(), "Optimize request started");
        self.in_flight = Some(tokio::spawn(async move {
            let started = Instant::now();
            let outcome = optimizer.optimize(&request).await;
            let duration = started.elapsed();
            debug!(
                session_id = %session_id,
                request_tag = %tag,
                duration_ms = duration.as_millis() as u64,
                ok = outcome.is_ok(),
                "Optimize request finished"
            );
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Resolved {
                    tag,
                    outcome,
                    duration,
                });
            }
        }));
    }

    fn abort_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.id)
    }

    fn publish(&self) {
        // No subscribers is fine
        let _ = self.events.send(self.snapshot());
    }

    fn render(&self) -> String {
        let state = self.session.state();
        let options = RenderOptions {
            start_node_id: Some(state.start_node_id),
            ..Default::default()
        };
        render_svg(&state.nodes, state.current_frame(), &options)
    }
}
