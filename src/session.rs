//! Session state and transitions
//!
//! [`SessionState`] is the whole per-user state. [`reduce`] applies one
//! [`Event`] to it and returns the [`Effect`]s the caller must carry out; it has
//! no clock, no I/O and no randomness, so every transition can be tested in
//! isolation. [`Session`] pairs the state with a [`PlaybackTimer`] and executes
//! the timer effects, handing optimize jobs back to its owner.

use crate::error::{OptimizeError, SessionError};
use crate::iteration::{
    DataQualityIssue, FinalResult, IterationFrame, OptimizationResponse, ReplayLog,
    ValidatedResponse,
};
use crate::optimizer::{OptimizationParameters, OptimizationRequest};
use crate::playback::{
    Playback, PlaybackStatus, PlaybackTimer, Scheduler, TickToken, TimerCommand,
};
use crate::scenario::{self, ScenarioId};
use crate::stats::FrameStats;
use crate::{Node, NodeId};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything one viewer sees and edits.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub scenario: ScenarioId,
    /// Requested size for generated scenarios
    pub node_count: usize,
    pub nodes: Vec<Node>,
    pub params: OptimizationParameters,
    pub start_node_id: NodeId,
    pub result: Option<OptimizationResponse>,
    pub issues: Vec<DataQualityIssue>,
    pub playback: Playback,
    pub last_error: Option<SessionFailure>,
    /// Tag of the request in flight; responses with another tag are stale
    pub active_request: Option<Uuid>,
    pub last_call_duration: Option<Duration>,
}

/// Error shown to the user until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionFailure {
    pub kind: &'static str,
    pub message: String,
}

impl From<&OptimizeError> for SessionFailure {
    fn from(err: &OptimizeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl SessionState {
    /// Fresh state for a topology. Parameters are carried over by callers that
    /// re-initialize an existing session.
    pub fn new(scenario: ScenarioId, node_count: usize, nodes: Vec<Node>) -> Self {
        Self {
            scenario,
            node_count,
            start_node_id: nodes.first().map(|n| n.id).unwrap_or(0),
            nodes,
            params: OptimizationParameters::default(),
            result: None,
            issues: Vec::new(),
            playback: Playback::idle(),
            last_error: None,
            active_request: None,
            last_call_duration: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.active_request.is_some()
    }

    /// Frame under the playback cursor.
    pub fn current_frame(&self) -> Option<&IterationFrame> {
        let result = self.result.as_ref()?;
        result.iterations.get(self.playback.cursor()?)
    }

    pub fn current_stats(&self) -> Option<FrameStats> {
        let result = self.result.as_ref()?;
        FrameStats::at(&result.iterations, &self.nodes, self.playback.cursor()?)
    }

    /// Current topology and result as a replayable record.
    pub fn replay_log(&self) -> Option<ReplayLog> {
        Some(ReplayLog {
            scenario: self.scenario,
            start_node_id: self.start_node_id,
            nodes: self.nodes.clone(),
            response: self.result.clone()?,
        })
    }

    /// Payload for an optimize call against the current topology.
    pub fn build_request(&self) -> OptimizationRequest {
        OptimizationRequest::new(
            self.scenario.config().context,
            self.start_node_id,
            self.nodes.clone(),
            self.params.clone(),
        )
    }
}

/// One user or timer action.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// New scenario, node count or reset; carries the already generated nodes
    TopologyChanged {
        scenario: ScenarioId,
        node_count: usize,
        nodes: Vec<Node>,
    },
    ParamsChanged(OptimizationParameters),
    StartNodeSelected(NodeId),
    OptimizeRequested { tag: Uuid },
    OptimizeResolved {
        tag: Uuid,
        outcome: Result<ValidatedResponse, OptimizeError>,
        duration: Duration,
    },
    Tick,
    PlayToggled,
    SkipRequested,
    ErrorDismissed,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Timer(TimerCommand),
    CallOptimizer { tag: Uuid, request: OptimizationRequest },
}

/// Apply one event.
pub fn reduce(state: &mut SessionState, event: Event) -> Result<Vec<Effect>, SessionError> {
    match event {
        Event::TopologyChanged {
            scenario,
            node_count,
            nodes,
        } => {
            if let Some(tag) = state.active_request {
                debug!(request_tag = %tag, "Abandoning in-flight request on topology change");
            }
            let params = state.params.clone();
            *state = SessionState::new(scenario, node_count, nodes);
            state.params = params;
            Ok(vec![Effect::Timer(TimerCommand::Cancel)])
        }

        Event::ParamsChanged(params) => {
            if state.is_loading() {
                return Err(SessionError::RequestInFlight);
            }
            params.validate()?;
            state.params = params;
            Ok(Vec::new())
        }

        Event::StartNodeSelected(id) => {
            if state.is_loading() {
                return Err(SessionError::RequestInFlight);
            }
            if !state.nodes.iter().any(|n| n.id == id) {
                return Err(SessionError::UnknownStartNode(id));
            }
            state.start_node_id = id;
            Ok(Vec::new())
        }

        Event::OptimizeRequested { tag } => {
            if state.is_loading() {
                return Err(SessionError::RequestInFlight);
            }
            state.result = None;
            state.issues.clear();
            state.last_error = None;
            state.active_request = Some(tag);
            let timer = state.playback.reset();
            Ok(vec![
                Effect::Timer(timer),
                Effect::CallOptimizer {
                    tag,
                    request: state.build_request(),
                },
            ])
        }

        Event::OptimizeResolved {
            tag,
            outcome,
            duration,
        } => {
            if state.active_request != Some(tag) {
                debug!(request_tag = %tag, "Discarding stale optimize response");
                return Ok(Vec::new());
            }
            state.active_request = None;
            state.last_call_duration = Some(duration);

            match outcome {
                Ok(validated) => {
                    let frames = validated.response.iterations.len();
                    state.issues = validated.issues;
                    state.result = Some(validated.response);
                    let timer = state.playback.load(frames);
                    Ok(vec![Effect::Timer(timer)])
                }
                Err(err) => {
                    state.last_error = Some(SessionFailure::from(&err));
                    let timer = state.playback.reset();
                    Ok(vec![Effect::Timer(timer)])
                }
            }
        }

        Event::Tick => Ok(vec![Effect::Timer(state.playback.tick())]),
        Event::PlayToggled => Ok(vec![Effect::Timer(state.playback.toggle())]),
        Event::SkipRequested => Ok(vec![Effect::Timer(state.playback.skip_to_end())]),

        Event::ErrorDismissed => {
            state.last_error = None;
            Ok(Vec::new())
        }
    }
}

/// Work the owner must start after a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeJob {
    pub tag: Uuid,
    pub request: OptimizationRequest,
}

/// State plus its playback timer.
pub struct Session<S> {
    state: SessionState,
    timer: PlaybackTimer<S>,
}

impl<S: Scheduler> Session<S> {
    /// Session on a fresh topology of `scenario`.
    pub fn new<R: Rng + ?Sized>(
        scenario: ScenarioId,
        node_count: usize,
        rng: &mut R,
        timer: PlaybackTimer<S>,
    ) -> Result<Self, SessionError> {
        // The count is kept for later switches to a generated scenario
        let node_count = scenario::validate_node_count(node_count)?;
        let nodes = scenario::build_nodes(scenario, node_count, rng)?;
        Ok(Self {
            state: SessionState::new(scenario, node_count, nodes),
            timer,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn timer(&self) -> &PlaybackTimer<S> {
        &self.timer
    }

    /// Apply an event and run its timer effects. Optimize calls are returned.
    pub fn dispatch(&mut self, event: Event) -> Result<Option<OptimizeJob>, SessionError> {
        let effects = reduce(&mut self.state, event)?;
        let mut job = None;
        for effect in effects {
            match effect {
                Effect::Timer(command) => self.timer.apply(command),
                Effect::CallOptimizer { tag, request } => {
                    job = Some(OptimizeJob { tag, request });
                }
            }
        }
        Ok(job)
    }

    /// Deliver a fired timer token. Stale tokens are dropped.
    pub fn on_tick(&mut self, token: TickToken) -> bool {
        if !self.timer.accept(token) {
            debug!(token, "Ignoring stale tick");
            return false;
        }
        // Tick cannot fail
        let _ = self.dispatch(Event::Tick);
        true
    }

    /// Switch scenario (or regenerate the current one) with fresh nodes.
    pub fn change_topology<R: Rng + ?Sized>(
        &mut self,
        scenario: ScenarioId,
        node_count: usize,
        rng: &mut R,
    ) -> Result<(), SessionError> {
        let node_count = scenario::validate_node_count(node_count)?;
        let nodes = scenario::build_nodes(scenario, node_count, rng)?;
        info!(scenario = %scenario, nodes = nodes.len(), "Topology changed");
        self.dispatch(Event::TopologyChanged {
            scenario,
            node_count,
            nodes,
        })?;
        Ok(())
    }

    /// Start an optimize request under a new tag.
    pub fn request_optimize(&mut self) -> Result<OptimizeJob, SessionError> {
        let tag = Uuid::new_v4();
        match self.dispatch(Event::OptimizeRequested { tag })? {
            Some(job) => Ok(job),
            None => Err(SessionError::Closed),
        }
    }

    /// Deliver the outcome of an optimize call.
    pub fn resolve(
        &mut self,
        tag: Uuid,
        outcome: Result<ValidatedResponse, OptimizeError>,
        duration: Duration,
    ) {
        if let Err(err) = &outcome {
            warn!(request_tag = %tag, kind = err.kind(), error = %err, "Optimize request failed");
        }
        // Resolution cannot fail
        let _ = self.dispatch(Event::OptimizeResolved {
            tag,
            outcome,
            duration,
        });
    }

    /// Serializable view of the session.
    pub fn snapshot(&self, session_id: Uuid) -> SessionSnapshot {
        SessionSnapshot::from_state(session_id, &self.state)
    }
}

/// What a client renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub scenario: ScenarioId,
    pub node_count: usize,
    pub nodes: Vec<Node>,
    pub params: OptimizationParameters,
    pub start_node_id: NodeId,
    pub status: PlaybackStatus,
    pub cursor: Option<usize>,
    pub frame_count: usize,
    pub frame: Option<IterationFrame>,
    pub stats: Option<FrameStats>,
    pub final_result: Option<FinalResult>,
    pub summary: Option<String>,
    pub explanation: Option<String>,
    pub issues: Vec<DataQualityIssue>,
    pub loading: bool,
    pub error: Option<SessionFailure>,
    pub last_call_ms: Option<u64>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SessionSnapshot {
    pub fn from_state(session_id: Uuid, state: &SessionState) -> Self {
        let result = state.result.as_ref();
        Self {
            session_id,
            scenario: state.scenario,
            node_count: state.node_count,
            nodes: state.nodes.clone(),
            params: state.params.clone(),
            start_node_id: state.start_node_id,
            status: state.playback.status(),
            cursor: state.playback.cursor(),
            frame_count: state.playback.len(),
            frame: state.current_frame().cloned(),
            stats: state.current_stats(),
            final_result: result.map(|r| r.final_result.clone()),
            summary: result.map(|r| r.summary.clone()),
            explanation: result.map(|r| r.explanation.clone()),
            issues: state.issues.clone(),
            loading: state.is_loading(),
            error: state.last_error.clone(),
            last_call_ms: state.last_call_duration.map(|d| d.as_millis() as u64),
            updated_at: chrono::Utc::now(),
        }
    }
}
