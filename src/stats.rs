//! Derived display statistics
//!
//! Pure functions of `(iterations, nodes, cursor)`. Nothing here keeps state, so
//! every value can be recomputed for any cursor position during replay.

use crate::geometry::route_distance;
use crate::iteration::IterationFrame;
use crate::Node;
use serde::{Deserialize, Serialize};

/// Absolute tolerance when matching a frame's best energy to the final best.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-3;

/// Number of tunneling frames in `0..=k`. `k` past the end counts every frame.
pub fn cumulative_tunneling(frames: &[IterationFrame], k: usize) -> usize {
    frames.iter().take(k.saturating_add(1)).filter(|f| f.tunneling).count()
}

/// Best energy of the last frame, the value the run is judged by.
pub fn final_best_energy(frames: &[IterationFrame]) -> Option<f64> {
    frames.last().map(|f| f.best_energy)
}

/// Relative reduction from the first frame's energy to the final best, in
/// percent.
///
/// Reports 0 for an empty log, a zero initial energy, or any non-finite result.
pub fn improvement_percent(frames: &[IterationFrame]) -> f64 {
    let (Some(first), Some(best)) = (frames.first(), final_best_energy(frames)) else {
        return 0.0;
    };
    let initial = first.current_energy;
    if initial == 0.0 {
        return 0.0;
    }
    let percent = (initial - best) / initial * 100.0;
    if percent.is_finite() {
        percent
    } else {
        0.0
    }
}

/// Step of the first frame whose best energy is within
/// [`CONVERGENCE_TOLERANCE`] of the final best.
///
/// Falls back to the last frame's step, and never reports a step beyond it.
/// Returns `None` for an empty log.
pub fn convergence_step(frames: &[IterationFrame]) -> Option<u64> {
    let last = frames.last()?;
    let target = last.best_energy;
    let step = frames
        .iter()
        .find(|f| (f.best_energy - target).abs() <= CONVERGENCE_TOLERANCE)
        .map(|f| f.step)
        .unwrap_or(last.step);
    Some(step.min(last.step))
}

/// Whether cursor `k` sits on the last frame.
pub fn is_finished(frames: &[IterationFrame], k: usize) -> bool {
    !frames.is_empty() && k == frames.len() - 1
}

/// Everything the stats panel shows for one cursor position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub cursor: usize,
    pub frame_count: usize,
    pub step: u64,
    pub current_energy: f64,
    pub best_energy: f64,
    pub tunneling: bool,
    pub cumulative_tunneling: usize,
    /// Closed tour length of `current_route`, recomputed from coordinates
    pub current_distance: f64,
    /// Closed tour length of `best_route`, recomputed from coordinates
    pub best_distance: f64,
    pub improvement_percent: f64,
    pub convergence_step: u64,
    pub finished: bool,
}

impl FrameStats {
    /// Stats at cursor `k`, or `None` when `k` is out of range.
    pub fn at(frames: &[IterationFrame], nodes: &[Node], k: usize) -> Option<Self> {
        let frame = frames.get(k)?;
        Some(Self {
            cursor: k,
            frame_count: frames.len(),
            step: frame.step,
            current_energy: frame.current_energy,
            best_energy: frame.best_energy,
            tunneling: frame.tunneling,
            cumulative_tunneling: cumulative_tunneling(frames, k),
            current_distance: route_distance(&frame.current_route, nodes),
            best_distance: route_distance(&frame.best_route, nodes),
            improvement_percent: improvement_percent(frames),
            convergence_step: convergence_step(frames).unwrap_or(frame.step),
            finished: is_finished(frames, k),
        })
    }
}
