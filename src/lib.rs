//! Quantum Route Viz: playback front-end for simulated route optimization
//!
//! Core library for node topologies, tour geometry, iteration-log validation,
//! derived statistics and the timer-driven playback session. The optimization
//! itself is produced by an external generative model; this crate only prepares
//! the request and replays what comes back.

pub mod api;
pub mod config;
pub mod error;
pub mod geometry;
pub mod iteration;
pub mod optimizer;
pub mod page;
pub mod playback;
pub mod prompt;
pub mod render;
pub mod runtime;
pub mod scenario;
pub mod session;
pub mod stats;

use serde::{Deserialize, Serialize};

/// Identifier of a node within one topology (`0..N-1`).
pub type NodeId = u32;

/// A labeled point in the plot plane.
///
/// Node sets are replaced wholesale on scenario or reset changes, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within its set
    pub id: NodeId,
    /// x coordinate (plot units)
    pub x: f64,
    /// y coordinate (plot units)
    pub y: f64,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Node {
    /// Create an unlabeled node.
    pub fn new(id: NodeId, x: f64, y: f64) -> Self {
        Self { id, x, y, label: None }
    }

    /// Create a labeled node.
    pub fn labeled(id: NodeId, x: f64, y: f64, label: impl Into<String>) -> Self {
        Self {
            id,
            x,
            y,
            label: Some(label.into()),
        }
    }

    /// Euclidean distance to another node.
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Label if present, otherwise the numeric id.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.id.to_string(),
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({:.2}, {:.2})", self.id, self.x, self.y)
    }
}
