//! Plane geometry for tours
//!
//! Euclidean distances, the rounded distance matrix sent as model context and
//! closed-tour lengths recomputed from coordinates.

use crate::{Node, NodeId};
use std::collections::HashMap;

/// Decimal places kept in the transmitted distance matrix.
pub const MATRIX_PRECISION: i32 = 2;

/// Euclidean distance between two nodes.
pub fn distance(a: &Node, b: &Node) -> f64 {
    a.distance_to(b)
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Square matrix of pairwise distances in node-list order,
/// rounded to [`MATRIX_PRECISION`] places.
pub fn build_matrix(nodes: &[Node]) -> Vec<Vec<f64>> {
    nodes
        .iter()
        .map(|a| {
            nodes
                .iter()
                .map(|b| round_to(distance(a, b), MATRIX_PRECISION))
                .collect()
        })
        .collect()
}

/// Length of the closed tour visiting `route` in order and returning to the
/// first node.
///
/// Returns 0 for routes with fewer than two ids or when any id is missing from
/// `nodes`.
pub fn route_distance(route: &[NodeId], nodes: &[Node]) -> f64 {
    if route.len() < 2 {
        return 0.0;
    }

    let index: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();

    let mut total = 0.0;
    for (i, id) in route.iter().enumerate() {
        let next = route[(i + 1) % route.len()];
        match (index.get(id), index.get(&next)) {
            (Some(a), Some(b)) => total += distance(a, b),
            _ => return 0.0,
        }
    }
    total
}
