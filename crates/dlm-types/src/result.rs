//! Results returned by inner engines and by the coordinator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    MaxEvaluations,
    MaxRuntime,
    FitnessThreshold,
    /// Coordinator only: the configured number of rounds was reached.
    MaxRounds,
}

/// One point on a convergence curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceSample {
    /// 1-based index of the evaluation that produced this sample.
    pub evaluations: u64,
    /// Best-so-far fitness at that evaluation.
    pub fitness: f64,
}

/// Plain-data view of a search state, as exchanged between engine and coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub mean: Vec<f64>,
    pub path: Vec<f64>,
    pub step_control: f64,
    pub sigma: f64,
    /// Archive vectors in slot order.
    pub archive: Vec<Vec<f64>>,
}

impl SearchSnapshot {
    pub fn archive_size(&self) -> usize {
        self.archive.len()
    }
}

/// Per-worker record produced at the end of one inner-engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub worker: usize,
    pub best_solution: Vec<f64>,
    pub best_fitness: f64,
    pub evaluations: u64,
    pub elapsed: Duration,
    /// Wall-clock spent inside the objective.
    pub evaluation_time: Duration,
    pub termination: TerminationReason,
    pub fitness_trace: Vec<TraceSample>,
    pub final_state: SearchSnapshot,
}

impl RoundResult {
    pub fn first_sample(&self) -> Option<TraceSample> {
        self.fitness_trace.first().copied()
    }

    pub fn last_sample(&self) -> Option<TraceSample> {
        self.fitness_trace.last().copied()
    }
}
