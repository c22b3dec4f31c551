//! Run lifecycle and per-round bookkeeping of the meta-coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Lifecycle state for a coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Summary of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round number (0-indexed).
    pub round: usize,
    /// Best fitness reported by any worker in this round.
    pub round_best: f64,
    /// Global best-so-far after this round.
    pub global_best: f64,
    /// Evaluations spent by all workers in this round.
    pub evaluations: u64,
    /// Workers that never delivered a result.
    pub failures: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate status of a coordinator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub id: RunId,
    pub state: RunState,
    pub rounds_completed: usize,
    pub workers_failed: usize,
    pub evaluations: u64,
    pub best_fitness: Option<f64>,
    pub rounds: Vec<RoundSummary>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl CoordinatorStatus {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            state: RunState::Pending,
            rounds_completed: 0,
            workers_failed: 0,
            evaluations: 0,
            best_fitness: None,
            rounds: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Fold a finished round into the totals.
    pub fn record_round(&mut self, summary: RoundSummary) {
        self.rounds_completed += 1;
        self.workers_failed += summary.failures;
        self.evaluations += summary.evaluations;
        self.best_fitness = Some(match self.best_fitness {
            Some(best) => best.min(summary.global_best),
            None => summary.global_best,
        });
        self.rounds.push(summary);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Completed | RunState::Failed)
    }
}
