// Limited-memory evolution strategy with a direction archive.
// Samples mirrored offspring mixing isotropic noise with archived evolution
// paths, and adapts the step-size with a paired significance test.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Geometric, StandardNormal};
use tracing::{debug, info, warn};

use dlm_types::{DlmResult, EngineConfig, InitialState, Problem, RoundResult, TerminationReason};

use crate::archive::Archive;
use crate::params::EngineParams;
use crate::restart::{NoRestart, RestartCriterion, StagnationCriterion};
use crate::state::{Population, SearchState};
use crate::stats::norm_cdf;
use crate::tracker::EvaluationTracker;

/// A single inner search engine.
pub struct LmEngine {
    problem: Problem,
    params: EngineParams,
    initial: Option<InitialState>,
    initial_sigma: f64,
    rng: ChaCha8Rng,
    tracker: EvaluationTracker,
    criterion: Box<dyn RestartCriterion>,
    worker: usize,
    restarts: usize,
}

impl LmEngine {
    /// Create an engine, resolving and validating every option.
    pub fn new(problem: Problem, config: EngineConfig) -> DlmResult<Self> {
        let params = EngineParams::resolve(&config, &problem)?;
        let rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let tracker = EvaluationTracker::new(
            params.limits,
            problem.dimension(),
            params.trace_interval,
        );
        let criterion: Box<dyn RestartCriterion> = if params.restart.enabled {
            Box::new(StagnationCriterion::new(
                params.stagnation,
                params.restart.fitness_diff,
                params.restart.sigma_threshold,
            ))
        } else {
            Box::new(NoRestart)
        };

        Ok(Self {
            initial_sigma: params.sigma,
            problem,
            params,
            initial: config.initial,
            rng,
            tracker,
            criterion,
            worker: 0,
            restarts: 0,
        })
    }

    /// Tag results with the index of the worker running this engine.
    pub fn with_worker(mut self, worker: usize) -> Self {
        self.worker = worker;
        self
    }

    /// Replace the restart criterion.
    pub fn with_restart_criterion(mut self, criterion: Box<dyn RestartCriterion>) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn tracker(&self) -> &EvaluationTracker {
        &self.tracker
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Build the starting state and the offspring buffer.
    ///
    /// The buffer's fitness entries hold the baseline fitness at the mean,
    /// which serves as the previous generation of the first paired test.
    pub fn initialize(&mut self) -> DlmResult<(SearchState, Population)> {
        let n = self.problem.dimension();
        let (mean, path, step_control, archive) = match &self.initial {
            Some(initial) => (
                initial.mean.clone(),
                initial.path.clone(),
                initial.step_control,
                Archive::from_vectors(initial.archive.clone(), n)?,
            ),
            None => {
                let mean = (0..n)
                    .map(|i| {
                        let (lo, hi) = (self.problem.lower()[i], self.problem.upper()[i]);
                        if hi > lo {
                            self.rng.gen_range(lo..hi)
                        } else {
                            lo
                        }
                    })
                    .collect();
                (
                    mean,
                    vec![0.0; n],
                    0.0,
                    Archive::new(self.params.archive_capacity, n)?,
                )
            }
        };

        let state = SearchState {
            mean,
            path,
            step_control,
            sigma: self.initial_sigma,
            generation: 0,
            archive,
        };
        let baseline = self.tracker.evaluate(&self.problem, &state.mean);
        let population = Population::new(self.params.population, n, baseline);

        Ok((state, population))
    }

    /// Sample mirrored offspring around the mean and evaluate them.
    ///
    /// Returns `false` when a termination condition fired before every
    /// member was evaluated; `population.evaluated` then counts only the
    /// members that were.
    pub fn sample_and_evaluate(
        &mut self,
        state: &SearchState,
        population: &mut Population,
    ) -> DlmResult<bool> {
        let n = state.dimension();
        let lambda = population.len();
        let half = (lambda + 1) / 2;
        let m = state.archive.capacity();
        let z_iso = self.params.isotropic_scale();
        let z_arc = self.params.archive_scale();
        let geometric = Geometric::new(self.params.success_prob)
            .map_err(|e| dlm_types::internal_error!("geometric sampler: {e}"))?;

        let mut mixed = vec![0.0; n];
        let mut z = vec![0.0; n];
        for k in 0..half {
            mixed.iter_mut().for_each(|v| *v = 0.0);
            for _ in 0..self.params.mixing_strength {
                let trials = geometric.sample(&mut self.rng) + 1;
                let position = m - (trials % m as u64) as usize - 1;
                let direction = state.archive.vector(state.archive.slot_at(position));
                let scale: f64 = self.rng.sample(StandardNormal);
                for (acc, d) in mixed.iter_mut().zip(direction) {
                    *acc += scale * d;
                }
            }
            for (zi, qi) in z.iter_mut().zip(&mixed) {
                let g: f64 = self.rng.sample(StandardNormal);
                *zi = z_iso * g + z_arc * qi;
            }

            for j in 0..n {
                population.members[k][j] = state.mean[j] + state.sigma * z[j];
            }
            if half + k < lambda {
                for j in 0..n {
                    population.members[half + k][j] = state.mean[j] - state.sigma * z[j];
                }
            }
        }

        population.evaluated = 0;
        for k in 0..lambda {
            if self.tracker.check().is_some() {
                return Ok(false);
            }
            population.fitness[k] = self.tracker.evaluate(&self.problem, &population.members[k]);
            population.evaluated += 1;
        }
        Ok(true)
    }

    /// Move the mean toward the best parents, write the evolution path into
    /// the archive and adapt the step-size.
    ///
    /// `previous_fitness` is the ascending fitness of the previous generation.
    pub fn update_distribution(
        &mut self,
        state: &mut SearchState,
        population: &Population,
        previous_fitness: &[f64],
    ) {
        let n = state.dimension();
        let order = population.ranking();
        let parents = self.params.parents.min(order.len());
        let weights = &self.params.weights[..parents];

        let mut weighted_mean = vec![0.0; n];
        for (w, &i) in weights.iter().zip(&order[..parents]) {
            for (acc, x) in weighted_mean.iter_mut().zip(&population.members[i]) {
                *acc += w * x;
            }
        }

        let decay = 1.0 - self.params.path_rate;
        let path_scale = self.params.path_scale();
        for j in 0..n {
            state.path[j] = decay * state.path[j]
                + path_scale * (weighted_mean[j] - state.mean[j]) / state.sigma;
        }
        state.mean = weighted_mean;

        state
            .archive
            .record(state.generation, &state.path, self.params.min_spacing);

        // paired test: weighted share of parent ranks that improved on the previous generation
        let l_w: f64 = weights
            .iter()
            .enumerate()
            .filter(|(r, _)| {
                previous_fitness
                    .get(*r)
                    .map_or(false, |&before| before > population.fitness[order[*r]])
            })
            .map(|(_, w)| w)
            .sum();
        state.step_control = (1.0 - self.params.step_rate) * state.step_control
            + self.params.step_scale() * (2.0 * l_w - 1.0);
        state.sigma *= (norm_cdf(state.step_control) - 1.0 + self.params.target_significance).exp();

        state.generation += 1;
    }

    /// Rebuild the state from scratch if the restart criterion fires.
    ///
    /// Best-so-far bookkeeping lives in the tracker and is kept.
    pub fn restart(
        &mut self,
        state: &mut SearchState,
        population: &mut Population,
    ) -> DlmResult<bool> {
        let generation_best = population.best_fitness();
        if !self.criterion.should_restart(state, generation_best) {
            return Ok(false);
        }

        self.restarts += 1;
        self.params.grow_population(self.params.restart.population_growth);
        self.criterion.reset();
        warn!(
            worker = self.worker,
            restarts = self.restarts,
            population = self.params.population,
            best = self.tracker.best_fitness(),
            "restarting search state"
        );

        let (fresh_state, fresh_population) = self.initialize()?;
        *state = fresh_state;
        *population = fresh_population;
        Ok(true)
    }

    /// Run generations until a termination condition fires.
    pub fn run(mut self) -> DlmResult<RoundResult> {
        info!(
            worker = self.worker,
            dimension = self.params.dimension,
            archive = self.params.archive_capacity,
            population = self.params.population,
            "starting limited-memory search"
        );

        let (mut state, mut population) = self.initialize()?;
        let mut previous = population.ranked_fitness();

        let termination = loop {
            if let Some(reason) = self.tracker.check() {
                break reason;
            }
            if !self.sample_and_evaluate(&state, &mut population)? {
                break self
                    .tracker
                    .check()
                    .unwrap_or(TerminationReason::MaxEvaluations);
            }
            self.update_distribution(&mut state, &population, &previous);
            debug!(
                worker = self.worker,
                generation = state.generation,
                sigma = state.sigma,
                best = self.tracker.best_fitness(),
                "generation complete"
            );

            self.restart(&mut state, &mut population)?;
            previous = population.ranked_fitness();
        };

        self.tracker.finish();
        info!(
            worker = self.worker,
            evaluations = self.tracker.evaluations(),
            best = self.tracker.best_fitness(),
            ?termination,
            "search finished"
        );

        Ok(RoundResult {
            worker: self.worker,
            best_solution: self.tracker.best_solution().to_vec(),
            best_fitness: self.tracker.best_fitness(),
            evaluations: self.tracker.evaluations(),
            elapsed: self.tracker.elapsed(),
            evaluation_time: self.tracker.evaluation_time(),
            termination,
            fitness_trace: self.tracker.trace().to_vec(),
            final_state: state.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWrite;
    use std::sync::Arc;

    fn sphere(n: usize) -> Problem {
        Problem::uniform(
            Arc::new(|x: &[f64]| x.iter().map(|v| v * v).sum::<f64>()),
            n,
            -5.0,
            5.0,
        )
        .unwrap()
    }

    #[test]
    fn sphere_reaches_tight_threshold() {
        let config = EngineConfig::new(8).with_seed(42).with_max_evaluations(10_000);
        let result = LmEngine::new(sphere(10), config).unwrap().run().unwrap();

        assert!(result.best_fitness < 1e-10, "best = {}", result.best_fitness);
        assert!(result.evaluations <= 10_000);
        assert_eq!(result.termination, TerminationReason::MaxEvaluations);
    }

    #[test]
    fn fitness_threshold_stops_early() {
        let config = EngineConfig::new(8)
            .with_seed(3)
            .with_max_evaluations(10_000)
            .with_fitness_threshold(1e-6);
        let result = LmEngine::new(sphere(10), config).unwrap().run().unwrap();

        assert_eq!(result.termination, TerminationReason::FitnessThreshold);
        assert!(result.best_fitness < 1e-6);
        assert!(result.evaluations < 10_000);
        assert_eq!(result.last_sample().unwrap().evaluations, result.evaluations);
    }

    #[test]
    fn archive_fills_then_evicts_once() {
        let config = EngineConfig::new(5).with_seed(9).without_restart();
        let mut engine = LmEngine::new(sphere(20), config).unwrap();
        let (mut state, mut population) = engine.initialize().unwrap();
        let mut previous = population.ranked_fitness();

        for _ in 0..4 {
            assert!(engine.sample_and_evaluate(&state, &mut population).unwrap());
            engine.update_distribution(&mut state, &population, &previous);
            previous = population.ranked_fitness();
        }
        assert_eq!(state.archive.filled(), 4);
        assert_eq!(state.archive.usage_order(), &[0, 1, 2, 3, 4]);
        assert!(state.archive.vector(4).iter().all(|v| *v == 0.0));

        let mut writes = Vec::new();
        for _ in 0..2 {
            let generation = state.generation;
            let before = state.archive.clone();
            engine.sample_and_evaluate(&state, &mut population).unwrap();
            engine.update_distribution(&mut state, &population, &previous);
            previous = population.ranked_fitness();
            let slot = (0..5)
                .find(|&s| state.archive.vector(s) != before.vector(s))
                .expect("one slot rewritten");
            writes.push((generation, slot, state.archive.written_at(slot)));
        }

        // generation 4 fills the last slot, generation 5 evicts the oldest
        assert_eq!(writes[0], (4, 4, 4));
        assert_eq!(writes[1], (5, 0, 5));
        assert_eq!(state.archive.usage_order(), &[1, 2, 3, 4, 0]);
        assert_eq!(state.archive.filled(), 5);
        assert!(matches!(
            state.archive.clone().record(6, &vec![0.0; 20], engine.params().min_spacing),
            ArchiveWrite::Evicted { position: 0, .. }
        ));
    }

    #[test]
    fn partial_generation_counts_only_evaluated_members() {
        // one baseline evaluation plus three offspring
        let config = EngineConfig::new(4)
            .with_seed(1)
            .with_population_size(10)
            .with_max_evaluations(4);
        let mut engine = LmEngine::new(sphere(6), config).unwrap();
        let (state, mut population) = engine.initialize().unwrap();

        let complete = engine.sample_and_evaluate(&state, &mut population).unwrap();
        assert!(!complete);
        assert_eq!(population.evaluated, 3);
        assert_eq!(engine.tracker().evaluations(), 4);
    }

    #[test]
    fn mirrored_pairs_straddle_the_mean() {
        let config = EngineConfig::new(3).with_seed(5).with_population_size(7);
        let mut engine = LmEngine::new(sphere(4), config).unwrap();
        let (state, mut population) = engine.initialize().unwrap();
        engine.sample_and_evaluate(&state, &mut population).unwrap();

        // half = 4, so members 0..3 mirror into 4..7 and member 3 stays unpaired
        for k in 0..3 {
            for j in 0..4 {
                let midpoint = (population.members[k][j] + population.members[4 + k][j]) / 2.0;
                assert!((midpoint - state.mean[j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn continuation_uses_supplied_state() {
        let initial = InitialState {
            mean: vec![1.0; 5],
            path: vec![0.5; 5],
            step_control: 0.2,
            archive: vec![vec![0.1; 5]; 3],
        };
        let config = EngineConfig::new(1).with_initial_state(initial).with_sigma(0.3);
        let mut engine = LmEngine::new(sphere(5), config).unwrap();
        let (state, population) = engine.initialize().unwrap();

        assert_eq!(state.mean, vec![1.0; 5]);
        assert_eq!(state.step_control, 0.2);
        assert_eq!(state.sigma, 0.3);
        assert_eq!(state.archive.capacity(), 3);
        assert_eq!(state.archive.filled(), 3);
        assert!(population.fitness.iter().all(|y| *y == 5.0));
    }

    #[test]
    fn same_seed_reproduces_run() {
        let run = || {
            let config = EngineConfig::new(6).with_seed(77).with_max_evaluations(2_000);
            LmEngine::new(sphere(8), config).unwrap().run().unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.best_solution, b.best_solution);
        assert_eq!(a.final_state, b.final_state);
        assert_eq!(a.fitness_trace, b.fitness_trace);
    }

    #[test]
    fn restart_rebuilds_state_and_grows_population() {
        let config = EngineConfig::new(4).with_seed(2);
        let mut engine = LmEngine::new(sphere(6), config).unwrap();
        let (mut state, mut population) = engine.initialize().unwrap();
        let lambda = population.len();

        state.sigma = 1e-14;
        state.generation = 12;
        let restarted = engine.restart(&mut state, &mut population).unwrap();

        assert!(restarted);
        assert_eq!(engine.restarts(), 1);
        assert_eq!(state.generation, 0);
        assert_eq!(state.sigma, 5.0);
        assert_eq!(population.len(), lambda * 2);
        assert_eq!(state.archive.filled(), 0);
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(LmEngine::new(sphere(3), EngineConfig::new(0)).is_err());
        assert!(LmEngine::new(sphere(3), EngineConfig::new(2).with_mixing_strength(3)).is_err());
    }
}
