//! Outer meta-coordinator: evolves the configurations of many inner engines
//! in synchronous rounds over an execution substrate.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dlm_types::{
    validation_error, ConfigError, CoordinatorConfig, DlmResult, FailurePolicy, Problem,
    TerminationReason, TraceSample, WorkerFailure,
};

use crate::aggregate::{AggregationWeights, MetaAggregate, WorkerRecord};
use crate::partition::{
    max_archive_size, plan_first_round, plan_round, ArchiveSizePrior, RoundPartition,
    RoundTemplate, WorkerPlan, MIN_WORKERS,
};
use crate::status::{CoordinatorStatus, RoundSummary, RunId};
use crate::substrate::{ClusterConfig, ExecutionSubstrate, PayloadHandle, WorkerSpec};

/// Shortest per-round budget a coordinator accepts.
pub const MIN_ROUND_RUNTIME: Duration = Duration::from_secs(3);

/// Best solution seen by any worker in any round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBest {
    pub solution: Vec<f64>,
    pub fitness: f64,
}

impl GlobalBest {
    pub fn new(dimension: usize) -> Self {
        Self {
            solution: vec![0.0; dimension],
            fitness: f64::INFINITY,
        }
    }

    /// Replace the best if `fitness` is strictly better; returns whether it was.
    pub fn offer(&mut self, solution: &[f64], fitness: f64) -> bool {
        if fitness < self.fitness {
            self.fitness = fitness;
            self.solution = solution.to_vec();
            true
        } else {
            false
        }
    }
}

/// Final outcome of a coordinator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: RunId,
    pub best_solution: Vec<f64>,
    pub best_fitness: f64,
    pub evaluations: u64,
    pub evaluation_time: Duration,
    pub runtime: Duration,
    pub rounds: usize,
    pub termination: TerminationReason,
    /// Each worker's first and last trace samples, offset by the evaluations
    /// spent before it.
    pub fitness_trace: Vec<TraceSample>,
}

/// Drives rounds of inner engines over an [`ExecutionSubstrate`].
pub struct MetaCoordinator<S: ExecutionSubstrate> {
    substrate: S,
    problem: Problem,
    config: CoordinatorConfig,
    partition: RoundPartition,
    prior: ArchiveSizePrior,
    weights: AggregationWeights,
    template: RoundTemplate,
    deadline: Option<Duration>,
    rng: ChaCha8Rng,
    records: Vec<WorkerRecord>,
    order: Vec<usize>,
    meta: Option<MetaAggregate>,
    best: GlobalBest,
    evaluations: u64,
    evaluation_time: Duration,
    trace: Vec<TraceSample>,
    round: usize,
    status: CoordinatorStatus,
}

impl<S: ExecutionSubstrate> MetaCoordinator<S> {
    /// Validate `config` and take ownership of a connected substrate.
    pub fn new(substrate: S, problem: Problem, config: CoordinatorConfig) -> DlmResult<Self> {
        if config.worker_count < MIN_WORKERS {
            return Err(ConfigError::TooFewWorkers {
                worker_count: config.worker_count,
                minimum: MIN_WORKERS,
            }
            .into());
        }
        if config.round_runtime < MIN_ROUND_RUNTIME {
            return Err(ConfigError::RoundRuntimeTooShort {
                runtime_secs: config.round_runtime.as_secs_f64(),
                minimum_secs: MIN_ROUND_RUNTIME.as_secs_f64(),
            }
            .into());
        }
        if config.round_evaluations == Some(0) {
            return Err(validation_error!("round_evaluations must be positive"));
        }
        if config.trace_interval == 0 {
            return Err(validation_error!("trace_interval must be positive"));
        }

        let partition = RoundPartition::new(config.worker_count);
        let prior = ArchiveSizePrior::new(max_archive_size(problem.dimension()));
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let template = RoundTemplate {
            runtime: config.round_runtime,
            max_evaluations: config.round_evaluations,
            fitness_threshold: config.fitness_threshold,
            trace_interval: config.trace_interval,
        };

        Ok(Self {
            weights: AggregationWeights::new(partition.outer()),
            deadline: config
                .max_runtime
                .map(|total| total.saturating_sub(config.round_runtime)),
            best: GlobalBest::new(problem.dimension()),
            status: CoordinatorStatus::new(Uuid::new_v4()),
            substrate,
            problem,
            config,
            partition,
            prior,
            template,
            rng,
            records: Vec::new(),
            order: Vec::new(),
            meta: None,
            evaluations: 0,
            evaluation_time: Duration::ZERO,
            trace: Vec::new(),
            round: 0,
        })
    }

    /// Connect a substrate from `cluster` and build a coordinator on it.
    pub fn connect(
        cluster: ClusterConfig,
        problem: Problem,
        config: CoordinatorConfig,
    ) -> DlmResult<Self> {
        let substrate = S::connect(cluster)?;
        Self::new(substrate, problem, config)
    }

    pub fn best(&self) -> &GlobalBest {
        &self.best
    }

    pub fn meta(&self) -> Option<&MetaAggregate> {
        self.meta.as_ref()
    }

    pub fn records(&self) -> &[WorkerRecord] {
        &self.records
    }

    /// Worker indices of the last round ranked by ascending fitness.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn partition(&self) -> &RoundPartition {
        &self.partition
    }

    pub fn max_archive_size(&self) -> usize {
        self.prior.max()
    }

    pub fn rounds_completed(&self) -> usize {
        self.round
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn status(&self) -> &CoordinatorStatus {
        &self.status
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Global stopping condition that currently holds, if any.
    pub fn check_termination(&self, elapsed: Duration) -> Option<TerminationReason> {
        if let Some(max) = self.config.max_evaluations {
            if self.evaluations >= max {
                return Some(TerminationReason::MaxEvaluations);
            }
        }
        if let Some(deadline) = self.deadline {
            if elapsed >= deadline {
                return Some(TerminationReason::MaxRuntime);
            }
        }
        if let Some(threshold) = self.config.fitness_threshold {
            if self.best.fitness < threshold {
                return Some(TerminationReason::FitnessThreshold);
            }
        }
        if let Some(max) = self.config.max_rounds {
            if self.round >= max {
                return Some(TerminationReason::MaxRounds);
            }
        }
        None
    }

    /// Plans for the next round: independent on the first one, partitioned afterwards.
    pub fn plan_next_round(&mut self) -> Vec<WorkerPlan> {
        match &self.meta {
            None => plan_first_round(
                &mut self.rng,
                &self.problem,
                self.config.worker_count,
                &self.prior,
            ),
            Some(meta) => plan_round(
                &mut self.rng,
                &self.problem,
                &self.partition,
                &self.prior,
                &self.records,
                &self.order,
                meta,
            ),
        }
    }

    /// Dispatch one round, wait at the barrier, then rank and aggregate.
    pub fn run_round(&mut self, payload: &PayloadHandle) -> DlmResult<RoundSummary> {
        let started = Instant::now();
        let round = self.round;
        let plans = self.plan_next_round();

        let mut pending = Vec::with_capacity(plans.len());
        for (worker, plan) in plans.iter().enumerate() {
            let spec = WorkerSpec {
                worker,
                round,
                resources: Default::default(),
            };
            let handle = self.substrate.spawn(spec, plan.engine_config(&self.template))?;
            pending.push(self.substrate.run(handle, payload)?);
        }
        debug!(round, workers = pending.len(), "round dispatched");

        let timeout = self
            .config
            .gather_timeout
            .map(|grace| self.config.round_runtime + grace);
        let outcomes = self.substrate.gather(pending, timeout)?;

        if self.records.is_empty() {
            let capacity = self.prior.max();
            self.records = plans
                .iter()
                .map(|plan| WorkerRecord::planned(plan, capacity))
                .collect();
        }

        let mut failures = 0;
        let mut round_best = f64::INFINITY;
        let mut round_evaluations = 0;
        for ((record, plan), outcome) in self.records.iter_mut().zip(&plans).zip(outcomes) {
            match outcome {
                Ok(result) => {
                    if self.best.offer(&result.best_solution, result.best_fitness) {
                        debug!(
                            round,
                            worker = result.worker,
                            best = result.best_fitness,
                            "new global best"
                        );
                    }
                    round_best = round_best.min(result.best_fitness);
                    let endpoints = [result.first_sample(), result.last_sample()];
                    for sample in endpoints.into_iter().flatten() {
                        self.trace.push(TraceSample {
                            evaluations: sample.evaluations + self.evaluations,
                            fitness: sample.fitness,
                        });
                    }
                    self.evaluations += result.evaluations;
                    self.evaluation_time += result.evaluation_time;
                    round_evaluations += result.evaluations;
                    record.absorb(&result);
                }
                Err(failure) => {
                    if self.config.failure_policy == FailurePolicy::Abort {
                        return Err(failure.into());
                    }
                    warn!(round, worker = ?failure.worker(), %failure, "worker failed; ranking it last");
                    record.replan(plan);
                    failures += 1;
                }
            }
        }

        if failures == self.config.worker_count {
            return Err(WorkerFailure::AllWorkersFailed {
                round,
                worker_count: self.config.worker_count,
            }
            .into());
        }

        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by(|&a, &b| self.records[a].fitness.total_cmp(&self.records[b].fitness));
        self.meta = Some(MetaAggregate::compute(
            &self.records,
            &order[..self.partition.outer()],
            &self.weights,
        ));
        self.order = order;
        self.round += 1;

        let summary = RoundSummary {
            round,
            round_best,
            global_best: self.best.fitness,
            evaluations: round_evaluations,
            failures,
            elapsed: started.elapsed(),
            finished_at: chrono::Utc::now(),
        };
        info!(
            round,
            round_best,
            global_best = self.best.fitness,
            evaluations = self.evaluations,
            failures,
            "round complete"
        );
        self.status.record_round(summary.clone());
        Ok(summary)
    }

    /// Run rounds until a global termination condition fires, then release
    /// the substrate.
    pub fn optimize(&mut self) -> DlmResult<OptimizationReport> {
        let started = Instant::now();
        self.status.mark_running();
        info!(
            run_id = %self.status.id,
            workers = self.config.worker_count,
            dimension = self.problem.dimension(),
            max_archive = self.prior.max(),
            "starting distributed search"
        );

        match self.run_rounds(started) {
            Ok(termination) => {
                self.substrate.shutdown()?;
                self.status.mark_completed();
                info!(
                    rounds = self.round,
                    evaluations = self.evaluations,
                    best = self.best.fitness,
                    ?termination,
                    "distributed search finished"
                );
                Ok(OptimizationReport {
                    run_id: self.status.id,
                    best_solution: self.best.solution.clone(),
                    best_fitness: self.best.fitness,
                    evaluations: self.evaluations,
                    evaluation_time: self.evaluation_time,
                    runtime: started.elapsed(),
                    rounds: self.round,
                    termination,
                    fitness_trace: self.trace.clone(),
                })
            }
            Err(error) => {
                if let Err(shutdown) = self.substrate.shutdown() {
                    warn!(%shutdown, "substrate shutdown failed after error");
                }
                self.status.mark_failed(error.to_string());
                Err(error)
            }
        }
    }

    fn run_rounds(&mut self, started: Instant) -> DlmResult<TerminationReason> {
        let payload = self.substrate.upload(self.problem.clone())?;
        loop {
            if let Some(reason) = self.check_termination(started.elapsed()) {
                return Ok(reason);
            }
            self.run_round(&payload)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSubstrate;
    use crate::substrate::{PendingRun, SubstrateResult, WorkerHandle, WorkerOutcome};
    use crossbeam_channel::bounded;
    use dlm_types::{DlmError, EngineConfig, SubstrateError};
    use std::collections::HashSet;
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

    fn quick_config(seed: u64) -> CoordinatorConfig {
        CoordinatorConfig::new(40, Duration::from_secs(3))
            .with_round_evaluations(300)
            .with_seed(seed)
    }

    fn local(threads: usize, config: CoordinatorConfig) -> MetaCoordinator<LocalSubstrate> {
        MetaCoordinator::connect(ClusterConfig::local(threads), sphere(6), config).unwrap()
    }

    /// Local substrate whose listed workers never report back.
    struct FlakySubstrate {
        inner: LocalSubstrate,
        failing: HashSet<usize>,
    }

    impl ExecutionSubstrate for FlakySubstrate {
        fn connect(config: ClusterConfig) -> SubstrateResult<Self> {
            Ok(Self {
                inner: LocalSubstrate::connect(config)?,
                failing: HashSet::new(),
            })
        }

        fn upload(&mut self, problem: Problem) -> SubstrateResult<PayloadHandle> {
            self.inner.upload(problem)
        }

        fn spawn(&mut self, spec: WorkerSpec, config: EngineConfig) -> SubstrateResult<WorkerHandle> {
            self.inner.spawn(spec, config)
        }

        fn run(&mut self, worker: WorkerHandle, payload: &PayloadHandle) -> SubstrateResult<PendingRun> {
            if self.failing.contains(&worker.task.worker) {
                let (_, rx) = bounded::<WorkerOutcome>(1);
                return Ok(PendingRun::new(worker.task.worker, worker.task.task_id, rx));
            }
            self.inner.run(worker, payload)
        }

        fn shutdown(&mut self) -> SubstrateResult<()> {
            self.inner.shutdown()
        }
    }

    fn flaky(
        failing: impl IntoIterator<Item = usize>,
        config: CoordinatorConfig,
    ) -> MetaCoordinator<FlakySubstrate> {
        let mut substrate = FlakySubstrate::connect(ClusterConfig::local(4)).unwrap();
        substrate.failing = failing.into_iter().collect();
        MetaCoordinator::new(substrate, sphere(6), config).unwrap()
    }

    #[test]
    fn rejects_too_few_workers_and_short_rounds() {
        let err = MetaCoordinator::<LocalSubstrate>::connect(
            ClusterConfig::local(1),
            sphere(2),
            CoordinatorConfig::new(39, Duration::from_secs(3)),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            DlmError::Config(ConfigError::TooFewWorkers { worker_count: 39, minimum: 40 })
        ));

        let err = MetaCoordinator::<LocalSubstrate>::connect(
            ClusterConfig::local(1),
            sphere(2),
            CoordinatorConfig::new(40, Duration::from_secs(2)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DlmError::Config(ConfigError::RoundRuntimeTooShort { .. })));

        let err = MetaCoordinator::<LocalSubstrate>::connect(
            ClusterConfig::local(1),
            sphere(2),
            quick_config(0).with_round_evaluations(0),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DlmError::Validation(_)));
    }

    #[test]
    fn deadline_holds_back_one_round() {
        let config = quick_config(1).with_max_runtime(Duration::from_secs(10));
        let coordinator = local(1, config);
        assert_eq!(
            coordinator.check_termination(Duration::from_secs(6)),
            None
        );
        assert_eq!(
            coordinator.check_termination(Duration::from_secs(7)),
            Some(TerminationReason::MaxRuntime)
        );
    }

    #[test]
    fn first_round_ranks_and_aggregates() {
        let mut coordinator = local(4, quick_config(7));
        let payload = coordinator.substrate.upload(sphere(6)).unwrap();
        let summary = coordinator.run_round(&payload).unwrap();

        assert_eq!(summary.round, 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.evaluations, 40 * 300);
        assert_eq!(coordinator.evaluations(), 40 * 300);
        assert_eq!(coordinator.records().len(), 40);
        assert_eq!(coordinator.order().len(), 40);

        let order = coordinator.order();
        let records = coordinator.records();
        assert!(order.windows(2).all(|w| records[w[0]].fitness <= records[w[1]].fitness));
        assert_eq!(coordinator.best().fitness, records[order[0]].fitness);
        assert!(records
            .iter()
            .all(|r| r.archive_size <= coordinator.max_archive_size()));

        let meta = coordinator.meta().unwrap();
        assert_eq!(meta.archive.capacity(), coordinator.max_archive_size());
        assert!(meta.archive_size >= 2.0 && meta.archive_size <= coordinator.max_archive_size() as f64);
        assert!(meta.sigma > 0.0);

        // first and last samples per worker, offsets growing with the running count
        assert_eq!(coordinator.trace.len(), 80);
        assert_eq!(coordinator.trace[0].evaluations, 1);
        assert_eq!(coordinator.trace[1].evaluations, 300);
        assert_eq!(coordinator.trace[2].evaluations, 301);
        assert_eq!(coordinator.trace[79].evaluations, 40 * 300);
    }

    #[test]
    fn global_best_never_regresses() {
        let mut coordinator = local(4, quick_config(11).with_max_rounds(4));
        let report = coordinator.optimize().unwrap();

        assert_eq!(report.rounds, 4);
        assert_eq!(report.termination, TerminationReason::MaxRounds);
        let bests: Vec<f64> = coordinator
            .status()
            .rounds
            .iter()
            .map(|r| r.global_best)
            .collect();
        assert!(bests.windows(2).all(|w| w[1] <= w[0]), "{bests:?}");
        assert_eq!(report.best_fitness, *bests.last().unwrap());
        assert_eq!(report.best_fitness, sphere(6).evaluate(&report.best_solution));
        assert!(!coordinator.substrate().is_connected());
    }

    #[test]
    fn fixed_seed_reproduces_meta_aggregate() {
        let run = |threads: usize| {
            let mut coordinator = local(threads, quick_config(23).with_max_rounds(2));
            coordinator.optimize().unwrap();
            (
                coordinator.meta().cloned().unwrap(),
                coordinator.order().to_vec(),
                coordinator.best().clone(),
            )
        };
        // completion order differs with the pool size, the aggregate must not
        let (a, b) = (run(1), run(8));
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(a.2, b.2);
    }

    #[test]
    fn evaluation_budget_stops_between_rounds() {
        let mut coordinator = local(4, quick_config(5).with_max_evaluations(20_000));
        let report = coordinator.optimize().unwrap();

        assert_eq!(report.termination, TerminationReason::MaxEvaluations);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.evaluations, 24_000);
    }

    #[test]
    fn failed_workers_rank_last_under_penalize() {
        let mut coordinator = flaky([0, 7, 39], quick_config(3).with_max_rounds(2));
        let report = coordinator.optimize().unwrap();

        assert_eq!(report.rounds, 2);
        assert_eq!(coordinator.status().workers_failed, 6);
        assert_eq!(report.evaluations, 2 * 37 * 300);

        let order = coordinator.order();
        let tail: HashSet<usize> = order[37..].iter().copied().collect();
        assert_eq!(tail, HashSet::from([0, 7, 39]));
        assert!(coordinator.records()[7].fitness.is_infinite());
    }

    #[test]
    fn abort_policy_fails_the_run() {
        let config = quick_config(3)
            .with_max_rounds(2)
            .with_failure_policy(FailurePolicy::Abort);
        let mut coordinator = flaky([12], config);

        let err = coordinator.optimize().unwrap_err();
        assert!(matches!(err, DlmError::Worker(WorkerFailure::Crashed { worker: 12 })));
        assert_eq!(coordinator.status().state, crate::status::RunState::Failed);
        assert_eq!(
            coordinator.substrate.inner.upload(sphere(2)),
            Err(SubstrateError::NotConnected)
        );
    }

    #[test]
    fn round_without_any_result_is_an_error() {
        let mut coordinator = flaky(0..40, quick_config(3).with_max_rounds(1));
        let err = coordinator.optimize().unwrap_err();
        assert!(matches!(
            err,
            DlmError::Worker(WorkerFailure::AllWorkersFailed { round: 0, worker_count: 40 })
        ));
    }
}
