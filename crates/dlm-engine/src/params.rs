//! Resolution of engine options into concrete strategy parameters.

use dlm_types::{ConfigError, DlmResult, EngineConfig, InitialState, Problem, RestartConfig};
use std::time::Duration;

/// Stopping conditions shared by every generation of one run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    pub max_evaluations: Option<u64>,
    pub max_runtime: Option<Duration>,
    pub fitness_threshold: Option<f64>,
}

/// Fully resolved strategy parameters for one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub dimension: usize,
    /// λ, offspring per generation.
    pub population: usize,
    /// μ, parents used for recombination.
    pub parents: usize,
    /// Rank weights of the μ parents, summing to 1.
    pub weights: Vec<f64>,
    pub mu_eff: f64,
    pub archive_capacity: usize,
    pub path_rate: f64,
    pub mixing_strength: usize,
    pub step_rate: f64,
    pub target_significance: f64,
    pub min_spacing: u64,
    pub success_prob: f64,
    /// Share of the sample variance drawn from archived directions.
    pub gamma: f64,
    pub sigma: f64,
    pub seed: Option<u64>,
    pub trace_interval: u64,
    pub limits: Limits,
    pub restart: RestartConfig,
    /// Resolved stagnation window (generations).
    pub stagnation: usize,
}

impl EngineParams {
    pub fn resolve(config: &EngineConfig, problem: &Problem) -> DlmResult<Self> {
        let n = problem.dimension();
        let n_f = n as f64;

        let archive_capacity = config.archive_capacity;
        if archive_capacity == 0 {
            return Err(ConfigError::InvalidArchiveCapacity {
                capacity: archive_capacity,
            }
            .into());
        }

        let mixing_strength = config.mixing_strength.unwrap_or(archive_capacity.min(4));
        if mixing_strength == 0 || mixing_strength > archive_capacity {
            return Err(ConfigError::InvalidMixingStrength {
                mixing_strength,
                archive_capacity,
            }
            .into());
        }

        let population = config
            .population_size
            .unwrap_or(4 + (3.0 * n_f.ln()).floor() as usize);
        if population < 2 {
            return Err(ConfigError::InvalidPopulation { size: population }.into());
        }

        let path_rate = check_rate("path_rate", config.path_rate.unwrap_or(0.4 / n_f.sqrt()))?;
        let step_rate = check_rate("step_rate", config.step_rate.unwrap_or(0.3))?;
        let target_significance = check_rate(
            "target_significance",
            config.target_significance.unwrap_or(0.05),
        )?;
        let success_prob = check_rate(
            "success_prob",
            config.success_prob.unwrap_or((3.8 / n_f).min(0.5)),
        )?;
        let min_spacing = config
            .min_spacing
            .unwrap_or((1.0 / path_rate).ceil() as u64);
        let gamma = 1.0 - (1.0 - success_prob).powi(archive_capacity as i32);

        let sigma = config.sigma.unwrap_or(problem.max_range() / 2.0);
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(ConfigError::InvalidSigma { sigma }.into());
        }

        if let Some(initial) = &config.initial {
            check_initial_state(initial, n, archive_capacity)?;
        }

        let (parents, weights, mu_eff) = rank_weights(population);
        let stagnation = config
            .restart
            .stagnation
            .unwrap_or(10 + (30.0 * n_f / population as f64).ceil() as usize);

        Ok(Self {
            dimension: n,
            population,
            parents,
            weights,
            mu_eff,
            archive_capacity,
            path_rate,
            mixing_strength,
            step_rate,
            target_significance,
            min_spacing,
            success_prob,
            gamma,
            sigma,
            seed: config.seed,
            trace_interval: config.trace_interval.max(1),
            limits: Limits {
                max_evaluations: config.max_evaluations,
                max_runtime: config.max_runtime,
                fitness_threshold: config.fitness_threshold,
            },
            restart: config.restart.clone(),
            stagnation,
        })
    }

    /// Enlarge the population after a restart and recompute the rank weights.
    pub fn grow_population(&mut self, factor: usize) {
        self.population *= factor.max(1);
        let (parents, weights, mu_eff) = rank_weights(self.population);
        self.parents = parents;
        self.weights = weights;
        self.mu_eff = mu_eff;
    }

    /// Scale of the isotropic component of each sample.
    pub fn isotropic_scale(&self) -> f64 {
        (1.0 - self.gamma).sqrt()
    }

    /// Scale of the archived component of each sample.
    pub fn archive_scale(&self) -> f64 {
        (self.gamma / self.mixing_strength as f64).sqrt()
    }

    /// Normalization of the evolution-path update.
    pub fn path_scale(&self) -> f64 {
        (self.path_rate * (2.0 - self.path_rate) * self.mu_eff).sqrt()
    }

    /// Normalization of the step-control update.
    pub fn step_scale(&self) -> f64 {
        (self.step_rate * (2.0 - self.step_rate) * self.mu_eff).sqrt()
    }
}

/// Log-decay weights for the best `population / 2` ranks.
fn rank_weights(population: usize) -> (usize, Vec<f64>, f64) {
    let parents = (population / 2).max(1);
    let base = ((population as f64 + 1.0) / 2.0).ln();
    let raw: Vec<f64> = (0..parents).map(|i| base - ((i + 1) as f64).ln()).collect();
    let total: f64 = raw.iter().sum();
    let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
    let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();
    (parents, weights, mu_eff)
}

fn check_rate(name: &str, value: f64) -> Result<f64, ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidRate {
            name: name.to_string(),
            value,
        })
    }
}

fn check_initial_state(
    initial: &InitialState,
    dimension: usize,
    archive_capacity: usize,
) -> Result<(), ConfigError> {
    let mismatch = |field: &str, actual: usize| ConfigError::DimensionMismatch {
        field: field.to_string(),
        expected: dimension,
        actual,
    };

    if initial.mean.len() != dimension {
        return Err(mismatch("mean", initial.mean.len()));
    }
    if initial.path.len() != dimension {
        return Err(mismatch("path", initial.path.len()));
    }
    if initial.archive.len() != archive_capacity {
        return Err(ConfigError::DimensionMismatch {
            field: "archive".to_string(),
            expected: archive_capacity,
            actual: initial.archive.len(),
        });
    }
    if let Some(bad) = initial.archive.iter().find(|v| v.len() != dimension) {
        return Err(mismatch("archive vector", bad.len()));
    }
    Ok(())
}
