//! Configuration for the inner search engine and the meta-coordinator.
//!
//! Every tunable is an explicit optional field; defaults are resolved once
//! when an engine or coordinator is constructed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// State carried over from a previous run (continuation instead of a fresh start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub mean: Vec<f64>,
    /// Evolution path.
    pub path: Vec<f64>,
    /// Scalar step-control accumulator of the paired test.
    pub step_control: f64,
    /// Archive direction vectors, one per slot.
    pub archive: Vec<Vec<f64>>,
}

/// Stagnation-based restart settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    pub enabled: bool,
    /// Generations over which the best fitness must improve. `None` = 10 + ⌈30n/λ⌉.
    pub stagnation: Option<usize>,
    /// Minimal improvement over the stagnation window.
    pub fitness_diff: f64,
    /// Restart once the step-size falls below this value.
    pub sigma_threshold: f64,
    /// Population multiplier applied on every restart.
    pub population_growth: usize,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stagnation: None,
            fitness_diff: 1e-12,
            sigma_threshold: 1e-12,
            population_growth: 2,
        }
    }
}

/// Options recognized by the inner search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of archive slots `m` (required, > 0).
    pub archive_capacity: usize,
    /// Offspring per generation. `None` = 4 + ⌊3 ln n⌋.
    pub population_size: Option<usize>,
    /// Evolution-path learning rate `c_c`. `None` = 0.4/√n.
    pub path_rate: Option<f64>,
    /// Archive vectors mixed into each sample. `None` = min(m, 4).
    pub mixing_strength: Option<usize>,
    /// Step-control learning rate `c_s`.
    pub step_rate: Option<f64>,
    /// Target significance level `a_z` of the paired test.
    pub target_significance: Option<f64>,
    /// Minimal generation spacing between archived paths. `None` = ⌈1/c_c⌉.
    pub min_spacing: Option<u64>,
    /// Success probability of the geometric slot sampler. `None` = 3.8/n.
    pub success_prob: Option<f64>,
    /// Initial step-size. `None` = half of the largest coordinate range.
    pub sigma: Option<f64>,
    pub seed: Option<u64>,
    pub max_runtime: Option<Duration>,
    pub max_evaluations: Option<u64>,
    pub fitness_threshold: Option<f64>,
    /// Evaluation stride between fitness-trace samples.
    pub trace_interval: u64,
    pub restart: RestartConfig,
    pub initial: Option<InitialState>,
}

impl EngineConfig {
    pub fn new(archive_capacity: usize) -> Self {
        Self {
            archive_capacity,
            population_size: None,
            path_rate: None,
            mixing_strength: None,
            step_rate: None,
            target_significance: None,
            min_spacing: None,
            success_prob: None,
            sigma: None,
            seed: None,
            max_runtime: None,
            max_evaluations: None,
            fitness_threshold: None,
            trace_interval: 100,
            restart: RestartConfig::default(),
            initial: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = Some(size);
        self
    }

    pub fn with_mixing_strength(mut self, mixing_strength: usize) -> Self {
        self.mixing_strength = Some(mixing_strength);
        self
    }

    pub fn with_max_evaluations(mut self, n: u64) -> Self {
        self.max_evaluations = Some(n);
        self
    }

    pub fn with_max_runtime(mut self, runtime: Duration) -> Self {
        self.max_runtime = Some(runtime);
        self
    }

    pub fn with_fitness_threshold(mut self, threshold: f64) -> Self {
        self.fitness_threshold = Some(threshold);
        self
    }

    pub fn with_trace_interval(mut self, interval: u64) -> Self {
        self.trace_interval = interval;
        self
    }

    pub fn with_restart(mut self, restart: RestartConfig) -> Self {
        self.restart = restart;
        self
    }

    pub fn without_restart(mut self) -> Self {
        self.restart.enabled = false;
        self
    }

    /// Continue from an existing state; the archive capacity follows the
    /// number of supplied archive vectors.
    pub fn with_initial_state(mut self, initial: InitialState) -> Self {
        self.archive_capacity = initial.archive.len();
        self.initial = Some(initial);
        self
    }
}

/// What the coordinator does when a worker never delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Rank the worker last with infinite fitness and keep its previous state.
    Penalize,
    /// Abort the whole run.
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Penalize
    }
}

/// Options recognized by the meta-coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of inner engines per round (≥ 40).
    pub worker_count: usize,
    /// Wall-clock budget of each inner engine per round (≥ 3 s).
    pub round_runtime: Duration,
    /// Global wall-clock budget. One round budget is held back from it.
    pub max_runtime: Option<Duration>,
    pub max_evaluations: Option<u64>,
    pub fitness_threshold: Option<f64>,
    /// Per-worker evaluation cap inside a single round.
    pub round_evaluations: Option<u64>,
    pub max_rounds: Option<usize>,
    /// How long the gather barrier waits past the round budget.
    pub gather_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    /// Evaluation stride of each worker's fitness trace.
    pub trace_interval: u64,
    pub seed: Option<u64>,
}

impl CoordinatorConfig {
    pub fn new(worker_count: usize, round_runtime: Duration) -> Self {
        Self {
            worker_count,
            round_runtime,
            max_runtime: None,
            max_evaluations: None,
            fitness_threshold: None,
            round_evaluations: None,
            max_rounds: None,
            gather_timeout: None,
            failure_policy: FailurePolicy::default(),
            trace_interval: 100,
            seed: None,
        }
    }

    pub fn with_max_runtime(mut self, runtime: Duration) -> Self {
        self.max_runtime = Some(runtime);
        self
    }

    pub fn with_max_evaluations(mut self, n: u64) -> Self {
        self.max_evaluations = Some(n);
        self
    }

    pub fn with_fitness_threshold(mut self, threshold: f64) -> Self {
        self.fitness_threshold = Some(threshold);
        self
    }

    pub fn with_round_evaluations(mut self, n: u64) -> Self {
        self.round_evaluations = Some(n);
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn with_gather_timeout(mut self, timeout: Duration) -> Self {
        self.gather_timeout = Some(timeout);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
