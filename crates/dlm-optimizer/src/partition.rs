//! Per-round partition of workers into elite, recombined and mutated groups,
//! and the plans each worker is dispatched with.

use rand::Rng;
use std::ops::Range;

use dlm_types::{EngineConfig, InitialState, Problem};

use crate::aggregate::{MetaAggregate, WorkerRecord};

/// Fewest workers a coordinator accepts.
pub const MIN_WORKERS: usize = 40;

/// Fraction of the mutation group that perturbs sigma within a narrow band.
const NARROW_BAND_SHARE: usize = 5;

/// Multiplicative band applied to the aggregate sigma.
const NARROW_BAND: (f64, f64) = (0.3, 3.3);

/// Lower end of a fully randomized sigma.
const RANDOM_SIGMA_FLOOR: f64 = 1e-16;

/// What a worker index does in a round after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Reuse the state of the worker ranked `rank`.
    Elite { rank: usize },
    /// Midpoint of the worker ranked `rank` and the meta aggregate.
    Recombined { rank: usize },
    /// Copy of the meta aggregate with a perturbed sigma.
    Mutated { narrow: bool },
}

/// Index ranges of the three groups; their sizes always sum to the worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPartition {
    worker_count: usize,
    outer: usize,
}

impl RoundPartition {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            outer: worker_count / 5,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of top-ranked workers feeding the elite and the aggregate.
    pub fn outer(&self) -> usize {
        self.outer
    }

    pub fn elite(&self) -> Range<usize> {
        0..self.outer
    }

    pub fn recombined(&self) -> Range<usize> {
        self.outer..2 * self.outer
    }

    pub fn mutated(&self) -> Range<usize> {
        2 * self.outer..self.worker_count
    }

    pub fn sizes(&self) -> (usize, usize, usize) {
        (
            self.elite().len(),
            self.recombined().len(),
            self.mutated().len(),
        )
    }

    pub fn role(&self, worker: usize) -> WorkerRole {
        if worker < self.outer {
            WorkerRole::Elite { rank: worker }
        } else if worker < 2 * self.outer {
            WorkerRole::Recombined {
                rank: worker - self.outer,
            }
        } else {
            let offset = worker - 2 * self.outer;
            let group = self.worker_count - 2 * self.outer;
            WorkerRole::Mutated {
                narrow: NARROW_BAND_SHARE * offset < group,
            }
        }
    }
}

/// Largest archive any worker may use: 2·⌈√n⌉.
pub fn max_archive_size(dimension: usize) -> usize {
    2 * (dimension as f64).sqrt().ceil() as usize
}

/// Discrete uniform prior over the permissible archive sizes `2..=m_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSizePrior {
    max: usize,
}

impl ArchiveSizePrior {
    pub fn new(max: usize) -> Self {
        Self { max: max.max(2) }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(2..=self.max)
    }
}

/// Everything a worker needs to start its engine for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    pub role: Option<WorkerRole>,
    pub mean: Vec<f64>,
    pub path: Vec<f64>,
    pub step_control: f64,
    pub sigma: f64,
    /// Archive rows, oldest first; the archive size is the row count.
    pub archive: Vec<Vec<f64>>,
    pub seed: u64,
}

impl WorkerPlan {
    pub fn archive_size(&self) -> usize {
        self.archive.len()
    }

    /// Engine configuration continuing from this plan.
    pub fn engine_config(&self, template: &RoundTemplate) -> EngineConfig {
        let mut config = EngineConfig::new(self.archive_size())
            .with_initial_state(InitialState {
                mean: self.mean.clone(),
                path: self.path.clone(),
                step_control: self.step_control,
                archive: self.archive.clone(),
            })
            .with_sigma(self.sigma)
            .with_seed(self.seed)
            .with_max_runtime(template.runtime)
            .with_trace_interval(template.trace_interval);
        config.max_evaluations = template.max_evaluations;
        config.fitness_threshold = template.fitness_threshold;
        config
    }
}

/// Limits shared by every worker of a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundTemplate {
    pub runtime: std::time::Duration,
    pub max_evaluations: Option<u64>,
    pub fitness_threshold: Option<f64>,
    pub trace_interval: u64,
}

/// Sigma drawn across the whole problem scale.
fn random_sigma<R: Rng + ?Sized>(rng: &mut R, problem: &Problem) -> f64 {
    rng.gen_range(RANDOM_SIGMA_FLOOR..1e-15 + problem.max_range() / 2.0)
}

/// Independent plans for the very first round.
pub fn plan_first_round<R: Rng + ?Sized>(
    rng: &mut R,
    problem: &Problem,
    worker_count: usize,
    prior: &ArchiveSizePrior,
) -> Vec<WorkerPlan> {
    let n = problem.dimension();
    (0..worker_count)
        .map(|_| {
            let mean = problem
                .lower()
                .iter()
                .zip(problem.upper())
                .map(|(&lo, &hi)| if hi > lo { rng.gen_range(lo..hi) } else { lo })
                .collect();
            let archive_size = prior.sample(rng);
            let sigma = random_sigma(rng, problem);
            WorkerPlan {
                role: None,
                mean,
                path: vec![0.0; n],
                step_control: 0.0,
                sigma,
                archive: vec![vec![0.0; n]; archive_size],
                seed: rng.gen(),
            }
        })
        .collect()
}

/// Plans for a round following a completed one.
///
/// `order` ranks worker indices by ascending fitness; its first
/// `partition.outer()` entries are the elite.
pub fn plan_round<R: Rng + ?Sized>(
    rng: &mut R,
    problem: &Problem,
    partition: &RoundPartition,
    prior: &ArchiveSizePrior,
    records: &[WorkerRecord],
    order: &[usize],
    meta: &MetaAggregate,
) -> Vec<WorkerPlan> {
    let scale = std::f64::consts::FRAC_1_SQRT_2;

    (0..partition.worker_count())
        .map(|worker| {
            let role = partition.role(worker);
            let mut plan = match role {
                WorkerRole::Elite { rank } => {
                    let record = &records[order[rank]];
                    WorkerPlan {
                        role: Some(role),
                        mean: record.solution.clone(),
                        path: record.path.clone(),
                        step_control: record.step_control,
                        sigma: record.sigma,
                        archive: record.bank.trailing(record.archive_size).to_vec(),
                        seed: 0,
                    }
                }
                WorkerRole::Recombined { rank } => {
                    let record = &records[order[rank]];
                    let size = (((record.archive_size as f64 + meta.archive_size) / 2.0).ceil()
                        as usize)
                        .clamp(1, record.bank.capacity());
                    let archive = record
                        .bank
                        .trailing(size)
                        .iter()
                        .zip(meta.archive.trailing(size))
                        .map(|(own, shared)| {
                            own.iter().zip(shared).map(|(a, b)| (a + b) * scale).collect()
                        })
                        .collect();
                    WorkerPlan {
                        role: Some(role),
                        mean: midpoint(&record.solution, &meta.mean),
                        path: record
                            .path
                            .iter()
                            .zip(&meta.path)
                            .map(|(a, b)| (a + b) * scale)
                            .collect(),
                        step_control: (record.step_control + meta.step_control) * scale,
                        sigma: (record.sigma + meta.sigma) * scale,
                        archive,
                        seed: 0,
                    }
                }
                WorkerRole::Mutated { narrow } => {
                    let size = prior.sample(rng);
                    let sigma = if narrow && meta.sigma.is_finite() && meta.sigma > 0.0 {
                        rng.gen_range(NARROW_BAND.0 * meta.sigma..=NARROW_BAND.1 * meta.sigma)
                    } else {
                        random_sigma(rng, problem)
                    };
                    WorkerPlan {
                        role: Some(role),
                        mean: meta.mean.clone(),
                        path: meta.path.clone(),
                        step_control: meta.step_control,
                        sigma,
                        archive: meta.archive.trailing(size).to_vec(),
                        seed: 0,
                    }
                }
            };
            plan.seed = rng.gen();
            plan
        })
        .collect()
}

fn midpoint(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()
}
