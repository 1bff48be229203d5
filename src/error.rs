//! Error types
//!
//! Library errors are `thiserror` enums; the HTTP layer maps them onto
//! `api::ApiError`.

use thiserror::Error;

/// Failure of one optimize request.
///
/// Every variant is terminal for the in-flight request only and is never
/// retried automatically.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizeError {
    /// Credential missing or empty
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or service failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Empty text, non-JSON text, or a payload that fails the schema check
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl OptimizeError {
    /// Short machine-readable kind, used in logs and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizeError::Configuration(_) => "configuration",
            OptimizeError::Transport(_) => "transport",
            OptimizeError::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<serde_json::Error> for OptimizeError {
    fn from(err: serde_json::Error) -> Self {
        OptimizeError::MalformedResponse(err.to_string())
    }
}

/// Rejected optimization parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("steps must be positive")]
    ZeroSteps,

    #[error("initial temperature must be positive and finite, got {0}")]
    InvalidTemperature(f64),

    #[error("tunneling rate must be within [0, 1], got {0}")]
    InvalidTunnelingRate(f64),
}

/// Rejected scenario configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    Unknown(String),

    #[error("node count must be between {min} and {max}, got {got}")]
    NodeCount { min: usize, max: usize, got: usize },
}

/// Rejected session transition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("an optimize request is already in flight")]
    RequestInFlight,

    #[error("node {0} is not part of the current topology")]
    UnknownStartNode(u32),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("session closed")]
    Closed,
}

/// Failure loading a saved replay log.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] OptimizeError),
}

/// Invalid service configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}
