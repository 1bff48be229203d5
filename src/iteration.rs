//! Iteration log model and validation
//!
//! The model's answer arrives as untyped JSON. [`validate_response`] promotes it
//! to typed data in two passes:
//!
//! 1. Schema check: the payload must be an object with a non-empty
//!    `iterations` array of well-formed frames. Failures are
//!    [`OptimizeError::MalformedResponse`].
//! 2. Invariant check: permutation, start-node, energy-ordering and
//!    tunneling-count expectations. Violations are kept as
//!    [`DataQualityIssue`]s and the response is still accepted.

use crate::error::{OptimizeError, ReplayError};
use crate::{Node, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Upper bound on frames kept from one response.
pub const MAX_FRAMES: usize = 20;

/// Slack used when comparing energies reported by the model.
const ENERGY_EPSILON: f64 = 1e-9;

/// One sampled snapshot of the simulated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationFrame {
    pub step: u64,
    pub current_route: Vec<NodeId>,
    pub current_energy: f64,
    pub best_route: Vec<NodeId>,
    pub best_energy: f64,
    #[serde(default)]
    pub tunneling: bool,
}

/// Summary the model claims for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub best_route: Vec<NodeId>,
    pub best_energy: f64,
    #[serde(default)]
    pub total_iterations: u64,
    #[serde(default)]
    pub tunneling_events: u64,
}

impl FinalResult {
    /// Summary derived from the last frame of a log.
    pub fn from_frames(frames: &[IterationFrame]) -> Option<Self> {
        let last = frames.last()?;
        Some(Self {
            best_route: last.best_route.clone(),
            best_energy: last.best_energy,
            total_iterations: last.step,
            tunneling_events: frames.iter().filter(|f| f.tunneling).count() as u64,
        })
    }
}

/// Typed model answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResponse {
    pub summary: String,
    pub iterations: Vec<IterationFrame>,
    pub final_result: FinalResult,
    pub explanation: String,
}

/// Which route of a frame an issue refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Current,
    Best,
    Final,
}

/// Accepted-but-suspicious content in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataQualityIssue {
    /// Route does not visit every node exactly once
    RouteNotPermutation {
        frame: Option<usize>,
        route: RouteKind,
    },
    /// Route does not begin at the selected start node
    WrongStartNode {
        frame: Option<usize>,
        route: RouteKind,
        expected: NodeId,
        found: Option<NodeId>,
    },
    /// `best_energy` grew compared to the previous frame
    BestEnergyIncreased { frame: usize, previous: f64, current: f64 },
    /// `best_energy` is above a `current_energy` already seen
    BestAboveSeenEnergy { frame: usize, best: f64, lowest_seen: f64 },
    /// `step` went backwards
    StepDecreased { frame: usize, previous: u64, current: u64 },
    /// An energy value below zero
    NegativeEnergy { frame: usize },
    /// Final summary tunneling count differs from the flagged frames
    TunnelingCountMismatch { claimed: u64, flagged: u64 },
    /// More than [`MAX_FRAMES`] frames were returned; the tail was dropped
    FramesTruncated { received: usize },
    /// No `final_result`; it was derived from the last frame
    FinalResultMissing,
}

/// A response that passed the schema check, with any invariant violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedResponse {
    pub response: OptimizationResponse,
    pub issues: Vec<DataQualityIssue>,
}

/// Parse the model's text answer into JSON.
///
/// Tolerates surrounding whitespace and a Markdown code fence.
pub fn parse_model_text(text: &str) -> Result<Value, OptimizeError> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        return Err(OptimizeError::MalformedResponse(
            "empty response text".to_string(),
        ));
    }
    Ok(serde_json::from_str(trimmed)?)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an info string such as "json" on the opening fence line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Schema check followed by invariant check.
pub fn validate_response(
    payload: Value,
    nodes: &[Node],
    start_node_id: NodeId,
) -> Result<ValidatedResponse, OptimizeError> {
    let Value::Object(mut object) = payload else {
        return Err(OptimizeError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    };

    let mut issues = Vec::new();

    let raw_frames = match object.remove("iterations") {
        Some(Value::Array(frames)) => frames,
        Some(_) => {
            return Err(OptimizeError::MalformedResponse(
                "`iterations` is not an array".to_string(),
            ))
        }
        None => {
            return Err(OptimizeError::MalformedResponse(
                "missing `iterations`".to_string(),
            ))
        }
    };
    if raw_frames.is_empty() {
        return Err(OptimizeError::MalformedResponse(
            "`iterations` is empty".to_string(),
        ));
    }
    if raw_frames.len() > MAX_FRAMES {
        issues.push(DataQualityIssue::FramesTruncated {
            received: raw_frames.len(),
        });
    }

    let iterations = raw_frames
        .into_iter()
        .take(MAX_FRAMES)
        .enumerate()
        .map(|(i, frame)| {
            serde_json::from_value::<IterationFrame>(frame).map_err(|e| {
                OptimizeError::MalformedResponse(format!("iteration {}: {}", i, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let final_result = match object.remove("final_result") {
        Some(Value::Null) | None => {
            issues.push(DataQualityIssue::FinalResultMissing);
            FinalResult::from_frames(&iterations).ok_or_else(|| {
                OptimizeError::MalformedResponse("`iterations` is empty".to_string())
            })?
        }
        Some(value) => serde_json::from_value(value)
            .map_err(|e| OptimizeError::MalformedResponse(format!("final_result: {}", e)))?,
    };

    let response = OptimizationResponse {
        summary: text_field(object.remove("summary")),
        explanation: text_field(object.remove("explanation")),
        iterations,
        final_result,
    };

    issues.extend(check_invariants(&response, nodes, start_node_id));

    Ok(ValidatedResponse { response, issues })
}

/// `summary`/`explanation` may come back as a string or as structured JSON.
fn text_field(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Expectations the model is asked to honor but that are never enforced.
pub fn check_invariants(
    response: &OptimizationResponse,
    nodes: &[Node],
    start_node_id: NodeId,
) -> Vec<DataQualityIssue> {
    let node_ids: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
    let mut issues = Vec::new();

    let mut check_route = |route: &[NodeId], frame: Option<usize>, kind: RouteKind| {
        if !is_permutation(route, &node_ids) {
            issues.push(DataQualityIssue::RouteNotPermutation { frame, route: kind });
        }
        if route.first() != Some(&start_node_id) {
            issues.push(DataQualityIssue::WrongStartNode {
                frame,
                route: kind,
                expected: start_node_id,
                found: route.first().copied(),
            });
        }
    };

    for (i, frame) in response.iterations.iter().enumerate() {
        check_route(&frame.current_route, Some(i), RouteKind::Current);
        check_route(&frame.best_route, Some(i), RouteKind::Best);
    }
    check_route(&response.final_result.best_route, None, RouteKind::Final);

    let mut lowest_seen = f64::INFINITY;
    let mut previous: Option<&IterationFrame> = None;
    for (i, frame) in response.iterations.iter().enumerate() {
        if frame.current_energy < 0.0 || frame.best_energy < 0.0 {
            issues.push(DataQualityIssue::NegativeEnergy { frame: i });
        }

        lowest_seen = lowest_seen.min(frame.current_energy);
        if frame.best_energy > lowest_seen + ENERGY_EPSILON {
            issues.push(DataQualityIssue::BestAboveSeenEnergy {
                frame: i,
                best: frame.best_energy,
                lowest_seen,
            });
        }

        if let Some(prev) = previous {
            if frame.best_energy > prev.best_energy + ENERGY_EPSILON {
                issues.push(DataQualityIssue::BestEnergyIncreased {
                    frame: i,
                    previous: prev.best_energy,
                    current: frame.best_energy,
                });
            }
            if frame.step < prev.step {
                issues.push(DataQualityIssue::StepDecreased {
                    frame: i,
                    previous: prev.step,
                    current: frame.step,
                });
            }
        }
        previous = Some(frame);
    }

    let flagged = response.iterations.iter().filter(|f| f.tunneling).count() as u64;
    if flagged != response.final_result.tunneling_events {
        issues.push(DataQualityIssue::TunnelingCountMismatch {
            claimed: response.final_result.tunneling_events,
            flagged,
        });
    }

    issues
}

fn is_permutation(route: &[NodeId], node_ids: &HashSet<NodeId>) -> bool {
    if route.len() != node_ids.len() {
        return false;
    }
    let mut seen = HashSet::with_capacity(route.len());
    route.iter().all(|id| node_ids.contains(id) && seen.insert(*id))
}

/// Self-contained record of one run: the topology it was computed for plus the
/// model answer. Exported by the session API and read by the `replay` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario: crate::scenario::ScenarioId,
    pub start_node_id: NodeId,
    pub nodes: Vec<Node>,
    pub response: OptimizationResponse,
}

impl ReplayLog {
    /// Load a log from disk and re-run validation against its own node set.
    pub fn from_path(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<DataQualityIssue>), ReplayError> {
        let text = std::fs::read_to_string(path)?;
        let mut value: Value = serde_json::from_str(&text)?;

        let response = value
            .get_mut("response")
            .map(Value::take)
            .ok_or_else(|| OptimizeError::MalformedResponse("missing `response`".to_string()))?;

        #[derive(Deserialize)]
        struct Header {
            #[serde(default)]
            scenario: crate::scenario::ScenarioId,
            #[serde(default)]
            start_node_id: NodeId,
            nodes: Vec<Node>,
        }
        let header: Header = serde_json::from_value(value)?;

        let validated = validate_response(response, &header.nodes, header.start_node_id)?;
        Ok((
            Self {
                scenario: header.scenario,
                start_node_id: header.start_node_id,
                nodes: header.nodes,
                response: validated.response,
            },
            validated.issues,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn nodes() -> Vec<Node> {
        (0..4).map(|i| Node::new(i, i as f64 * 10.0, 0.0)).collect()
    }

    fn frame(step: u64, energy: f64, best: f64, tunneling: bool) -> Value {
        json!({
            "step": step,
            "current_route": [0, 1, 2, 3],
            "current_energy": energy,
            "best_route": [0, 1, 2, 3],
            "best_energy": best,
            "tunneling": tunneling,
        })
    }

    fn clean_payload() -> Value {
        json!({
            "summary": "converged",
            "iterations": [
                frame(0, 100.0, 100.0, false),
                frame(50, 120.0, 90.0, true),
                frame(100, 80.0, 80.0, false),
            ],
            "final_result": {
                "best_route": [0, 1, 2, 3],
                "best_energy": 80.0,
                "total_iterations": 100,
                "tunneling_events": 1,
            },
            "explanation": "tunneled out of a local minimum",
        })
    }

    #[test]
    fn test_clean_response_has_no_issues() {
        let validated = validate_response(clean_payload(), &nodes(), 0).unwrap();
        assert!(validated.issues.is_empty(), "{:?}", validated.issues);
        assert_eq!(validated.response.iterations.len(), 3);
        assert_eq!(validated.response.summary, "converged");
    }

    #[test]
    fn test_schema_failures() {
        let cases = vec![
            json!([1, 2, 3]),
            json!({ "summary": "no frames" }),
            json!({ "iterations": {} }),
            json!({ "iterations": [] }),
            json!({ "iterations": [{ "step": 0 }] }),
        ];
        for payload in cases {
            let err = validate_response(payload.clone(), &nodes(), 0).unwrap_err();
            assert!(
                matches!(err, OptimizeError::MalformedResponse(_)),
                "{} -> {:?}",
                payload,
                err
            );
        }
    }

    #[test]
    fn test_missing_final_result_is_derived() {
        let mut payload = clean_payload();
        payload.as_object_mut().unwrap().remove("final_result");
        let validated = validate_response(payload, &nodes(), 0).unwrap();
        assert!(validated.issues.contains(&DataQualityIssue::FinalResultMissing));
        assert_eq!(validated.response.final_result.best_energy, 80.0);
        assert_eq!(validated.response.final_result.tunneling_events, 1);
        assert_eq!(validated.response.final_result.total_iterations, 100);
    }

    #[test]
    fn test_truncates_to_max_frames() {
        let frames: Vec<Value> = (0..25).map(|i| frame(i, 10.0, 10.0, false)).collect();
        let payload = json!({ "iterations": frames });
        let validated = validate_response(payload, &nodes(), 0).unwrap();
        assert_eq!(validated.response.iterations.len(), MAX_FRAMES);
        assert!(validated
            .issues
            .contains(&DataQualityIssue::FramesTruncated { received: 25 }));
    }

    #[test]
    fn test_invariant_violations_are_warnings() {
        let payload = json!({
            "iterations": [
                {
                    "step": 10,
                    "current_route": [1, 0, 2, 2],
                    "current_energy": 50.0,
                    "best_route": [0, 1, 2, 3],
                    "best_energy": 50.0,
                    "tunneling": true,
                },
                {
                    "step": 5,
                    "current_route": [0, 1, 2, 3],
                    "current_energy": 70.0,
                    "best_route": [0, 1, 2, 3],
                    "best_energy": 60.0,
                },
            ],
            "final_result": {
                "best_route": [0, 1, 2, 3],
                "best_energy": 50.0,
                "total_iterations": 10,
                "tunneling_events": 4,
            },
        });

        let validated = validate_response(payload, &nodes(), 0).unwrap();
        let issues = &validated.issues;

        assert!(issues.contains(&DataQualityIssue::RouteNotPermutation {
            frame: Some(0),
            route: RouteKind::Current,
        }));
        assert!(issues.contains(&DataQualityIssue::WrongStartNode {
            frame: Some(0),
            route: RouteKind::Current,
            expected: 0,
            found: Some(1),
        }));
        assert!(issues.contains(&DataQualityIssue::StepDecreased {
            frame: 1,
            previous: 10,
            current: 5,
        }));
        assert!(issues.contains(&DataQualityIssue::BestEnergyIncreased {
            frame: 1,
            previous: 50.0,
            current: 60.0,
        }));
        assert!(issues.contains(&DataQualityIssue::BestAboveSeenEnergy {
            frame: 1,
            best: 60.0,
            lowest_seen: 50.0,
        }));
        assert!(issues.contains(&DataQualityIssue::TunnelingCountMismatch {
            claimed: 4,
            flagged: 1,
        }));
    }

    #[test]
    fn test_parse_model_text() {
        assert!(parse_model_text("   ").is_err());
        assert!(parse_model_text("not json").is_err());
        assert_eq!(parse_model_text(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_model_text("```json\n{\"a\": 2}\n```").unwrap(),
            json!({"a": 2})
        );
        assert_eq!(parse_model_text("```\n[1]\n```").unwrap(), json!([1]));
    }

    #[test]
    fn test_structured_summary_is_stringified() {
        let mut payload = clean_payload();
        payload["summary"] = json!({ "initial_energy": 100.0 });
        let validated = validate_response(payload, &nodes(), 0).unwrap();
        assert_eq!(validated.response.summary, r#"{"initial_energy":100.0}"#);
    }

    #[test]
    fn test_replay_log_from_path() {
        let validated = validate_response(clean_payload(), &nodes(), 0).unwrap();
        let log = ReplayLog {
            scenario: crate::scenario::ScenarioId::Random,
            start_node_id: 0,
            nodes: nodes(),
            response: validated.response,
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&log).unwrap().as_bytes())
            .unwrap();

        let (loaded, issues) = ReplayLog::from_path(file.path()).unwrap();
        assert_eq!(loaded, log);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_replay_log_missing_file() {
        let err = ReplayLog::from_path("/nonexistent/replay.json").unwrap_err();
        assert!(matches!(err, ReplayError::Io(_)));
    }
}
