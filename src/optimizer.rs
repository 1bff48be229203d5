//! External optimization call
//!
//! The optimizer is a collaborator behind the [`Optimizer`] trait. The
//! production implementation, [`GenerativeOptimizer`], sends the request as
//! JSON to a `generateContent` endpoint together with
//! [`crate::prompt::SYSTEM_INSTRUCTION`] and validates whatever comes back.
//! Nothing here retries: every failure is reported once as an
//! [`OptimizeError`].

use crate::error::{OptimizeError, ParameterError};
use crate::geometry::build_matrix;
use crate::iteration::{parse_model_text, validate_response, ValidatedResponse};
use crate::prompt::SYSTEM_INSTRUCTION;
use crate::{Node, NodeId};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Search strategy the model is asked to simulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    QuantumAnnealing,
    SimulatedAnnealing,
    Greedy,
    Random,
}

/// User-editable run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParameters {
    pub steps: u32,
    pub init_temp: f64,
    pub tunneling_rate: f64,
    pub algorithm: Algorithm,
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        Self {
            steps: 1000,
            init_temp: 100.0,
            tunneling_rate: 0.3,
            algorithm: Algorithm::QuantumAnnealing,
        }
    }
}

impl OptimizationParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.steps == 0 {
            return Err(ParameterError::ZeroSteps);
        }
        if !(self.init_temp.is_finite() && self.init_temp > 0.0) {
            return Err(ParameterError::InvalidTemperature(self.init_temp));
        }
        if !(0.0..=1.0).contains(&self.tunneling_rate) {
            return Err(ParameterError::InvalidTunnelingRate(self.tunneling_rate));
        }
        Ok(())
    }
}

/// Payload sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub context: String,
    pub problem: String,
    pub start_node_id: NodeId,
    pub nodes: Vec<Node>,
    pub dist_matrix: Vec<Vec<f64>>,
    pub params: OptimizationParameters,
}

impl OptimizationRequest {
    /// Build a TSP request; the distance matrix is derived from `nodes`.
    pub fn new(
        context: impl Into<String>,
        start_node_id: NodeId,
        nodes: Vec<Node>,
        params: OptimizationParameters,
    ) -> Self {
        let dist_matrix = build_matrix(&nodes);
        Self {
            context: context.into(),
            problem: "tsp".to_string(),
            start_node_id,
            nodes,
            dist_matrix,
            params,
        }
    }
}

/// Future returned by [`Optimizer::optimize`].
pub type OptimizeFuture<'a> = BoxFuture<'a, Result<ValidatedResponse, OptimizeError>>;

/// Produces an iteration log for a request.
pub trait Optimizer: Send + Sync {
    fn optimize<'a>(&'a self, request: &'a OptimizationRequest) -> OptimizeFuture<'a>;
}

/// One HTTP exchange carrying a JSON body.
pub trait Transport: Send + Sync {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        api_key: &'a str,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, OptimizeError>>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, OptimizeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OptimizeError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        api_key: &'a str,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, OptimizeError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .header("x-goog-api-key", api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| OptimizeError::Transport(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| OptimizeError::Transport(e.to_string()))?;

            if !status.is_success() {
                let snippet: String = text.chars().take(200).collect();
                return Err(OptimizeError::Transport(format!(
                    "service returned {}: {}",
                    status, snippet
                )));
            }

            Ok(serde_json::from_str(&text)?)
        })
    }
}

/// Settings for [`GenerativeOptimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeSettings {
    /// Base URL, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key, read on every call
    pub api_key_env: String,
}

/// Optimizer backed by a hosted generative model.
pub struct GenerativeOptimizer {
    settings: GenerativeSettings,
    transport: Arc<dyn Transport>,
}

impl GenerativeOptimizer {
    pub fn new(settings: GenerativeSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    /// Request body: system instruction, the payload as the user turn, and a
    /// JSON response type.
    pub fn request_body(request: &OptimizationRequest) -> Result<Value, OptimizeError> {
        let payload = serde_json::to_string(request)?;
        Ok(json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": payload }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        }))
    }
}

impl Optimizer for GenerativeOptimizer {
    fn optimize<'a>(&'a self, request: &'a OptimizationRequest) -> OptimizeFuture<'a> {
        Box::pin(async move {
            let api_key = read_api_key(&self.settings.api_key_env)?;
            let body = Self::request_body(request)?;

            info!(
                model = %self.settings.model,
                nodes = request.nodes.len(),
                algorithm = ?request.params.algorithm,
                "Calling generative optimizer"
            );
            let envelope = self.transport.post_json(&self.url(), &api_key, &body).await?;

            let text = candidate_text(&envelope)?;
            debug!(bytes = text.len(), "Received model text");

            let payload = parse_model_text(&text)?;
            let validated = validate_response(payload, &request.nodes, request.start_node_id)?;
            if !validated.issues.is_empty() {
                warn!(
                    issues = validated.issues.len(),
                    "Accepted response with data-quality issues"
                );
            }
            Ok(validated)
        })
    }
}

/// Read the credential from the environment.
pub fn read_api_key(var: &str) -> Result<String, OptimizeError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(OptimizeError::Configuration(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

/// Concatenated text parts of the first candidate.
pub fn candidate_text(envelope: &Value) -> Result<String, OptimizeError> {
    let parts = envelope
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| OptimizeError::MalformedResponse("no candidate content".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(OptimizeError::MalformedResponse(
            "empty response text".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that counts calls and replies with a canned envelope.
    struct CannedTransport {
        calls: AtomicUsize,
        reply: Result<Value, OptimizeError>,
    }

    impl CannedTransport {
        fn new(reply: Result<Value, OptimizeError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply,
            })
        }
    }

    impl Transport for CannedTransport {
        fn post_json<'a>(
            &'a self,
            _url: &'a str,
            _api_key: &'a str,
            _body: &'a Value,
        ) -> BoxFuture<'a, Result<Value, OptimizeError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.clone();
            Box::pin(async move { reply })
        }
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::new(0, 0.0, 0.0),
            Node::new(1, 10.0, 0.0),
            Node::new(2, 10.0, 10.0),
        ]
    }

    fn request() -> OptimizationRequest {
        OptimizationRequest::new("test", 0, nodes(), OptimizationParameters::default())
    }

    fn envelope(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    fn settings(api_key_env: &str) -> GenerativeSettings {
        GenerativeSettings {
            endpoint: "http://localhost:9/v1beta/".to_string(),
            model: "test-model".to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }

    const LOG: &str = r#"{
        "summary": "ok",
        "iterations": [
            {"step": 0, "current_route": [0,1,2], "current_energy": 34.14,
             "best_route": [0,1,2], "best_energy": 34.14, "tunneling": false}
        ],
        "final_result": {"best_route": [0,1,2], "best_energy": 34.14,
                         "total_iterations": 1000, "tunneling_events": 0},
        "explanation": "triangle"
    }"#;

    #[tokio::test]
    async fn test_missing_credential_makes_no_call() {
        let transport = CannedTransport::new(Ok(envelope(LOG)));
        let optimizer = GenerativeOptimizer::new(
            settings("QUANTUM_ROUTE_VIZ_TEST_UNSET_KEY"),
            transport.clone(),
        );

        let err = optimizer.optimize(&request()).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Configuration(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_call() {
        std::env::set_var("QUANTUM_ROUTE_VIZ_TEST_KEY_OK", "secret");
        let transport = CannedTransport::new(Ok(envelope(LOG)));
        let optimizer =
            GenerativeOptimizer::new(settings("QUANTUM_ROUTE_VIZ_TEST_KEY_OK"), transport.clone());

        let validated = optimizer.optimize(&request()).await.unwrap();
        assert_eq!(validated.response.iterations.len(), 1);
        assert!(validated.issues.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_single_errors() {
        std::env::set_var("QUANTUM_ROUTE_VIZ_TEST_KEY_FAIL", "secret");
        let cases = vec![
            (
                Err(OptimizeError::Transport("connection refused".to_string())),
                "transport",
            ),
            (Ok(json!({ "candidates": [] })), "malformed_response"),
            (Ok(envelope("")), "malformed_response"),
            (Ok(envelope("I cannot help with that")), "malformed_response"),
            (Ok(envelope(r#"{"iterations": []}"#)), "malformed_response"),
        ];

        for (reply, kind) in cases {
            let transport = CannedTransport::new(reply);
            let optimizer = GenerativeOptimizer::new(
                settings("QUANTUM_ROUTE_VIZ_TEST_KEY_FAIL"),
                transport.clone(),
            );
            let err = optimizer.optimize(&request()).await.unwrap_err();
            assert_eq!(err.kind(), kind, "{:?}", err);
            assert_eq!(transport.calls.load(Ordering::SeqCst), 1, "no retries");
        }
    }

    #[test]
    fn test_request_payload_shape() {
        let req = request();
        assert_eq!(req.problem, "tsp");
        assert_eq!(req.dist_matrix.len(), 3);
        assert_eq!(req.dist_matrix[0][2], 14.14);

        let body = GenerativeOptimizer::request_body(&req).unwrap();
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        let echoed: OptimizationRequest = serde_json::from_str(text).unwrap();
        assert_eq!(echoed, req);
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let optimizer = GenerativeOptimizer::new(
            settings("UNUSED"),
            CannedTransport::new(Ok(Value::Null)),
        );
        assert_eq!(
            optimizer.url(),
            "http://localhost:9/v1beta/models/test-model:generateContent"
        );
    }

    #[test]
    fn test_parameter_validation() {
        let mut params = OptimizationParameters::default();
        assert!(params.validate().is_ok());

        params.steps = 0;
        assert_eq!(params.validate(), Err(ParameterError::ZeroSteps));

        params = OptimizationParameters {
            init_temp: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidTemperature(_))
        ));

        params = OptimizationParameters {
            tunneling_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidTunnelingRate(_))
        ));
    }

    #[test]
    fn test_algorithm_wire_names() {
        let json = serde_json::to_string(&Algorithm::SimulatedAnnealing).unwrap();
        assert_eq!(json, "\"simulated_annealing\"");
    }

    #[test]
    fn test_candidate_text_joins_parts() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }]
        });
        assert_eq!(candidate_text(&envelope).unwrap(), "{\"a\":1}");
    }
}
