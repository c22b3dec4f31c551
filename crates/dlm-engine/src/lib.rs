// DLM inner search engine
// Limited-memory evolution strategy with a fixed-capacity direction archive

pub mod archive;
pub mod engine;
pub mod params;
pub mod restart;
pub mod state;
pub mod stats;
pub mod tracker;

use dlm_types::{DlmResult, EngineConfig, Problem, RoundResult};

pub use archive::{Archive, ArchiveWrite};
pub use engine::LmEngine;
pub use params::{EngineParams, Limits};
pub use restart::{NoRestart, RestartCriterion, StagnationCriterion};
pub use state::{Population, SearchState};
pub use tracker::EvaluationTracker;

/// Run one engine to completion on `problem`.
pub fn optimize(problem: Problem, config: EngineConfig) -> DlmResult<RoundResult> {
    LmEngine::new(problem, config)?.run()
}

/// Run one engine as worker `worker` of a distributed round.
pub fn run_worker(problem: Problem, config: EngineConfig, worker: usize) -> DlmResult<RoundResult> {
    LmEngine::new(problem, config)?.with_worker(worker).run()
}
