//! # dlm-optimizer
//!
//! Distributed limited-memory evolution strategy.
//!
//! A [`MetaCoordinator`] runs many inner engines per round over an
//! [`ExecutionSubstrate`], re-seeding them each round through elitism,
//! recombination with a weighted meta aggregate, and step-size mutation.
//! [`LocalSubstrate`] runs the workers on an in-process thread pool.

mod aggregate;
mod coordinator;
mod local;
mod partition;
mod status;
mod substrate;

pub use aggregate::{AggregationWeights, ArchiveBank, MetaAggregate, WorkerRecord};
pub use coordinator::{GlobalBest, MetaCoordinator, OptimizationReport, MIN_ROUND_RUNTIME};
pub use local::LocalSubstrate;
pub use partition::{
    max_archive_size, plan_first_round, plan_round, ArchiveSizePrior, RoundPartition,
    RoundTemplate, WorkerPlan, WorkerRole, MIN_WORKERS,
};
pub use status::{CoordinatorStatus, RoundSummary, RunId, RunState};
pub use substrate::{
    ClusterConfig, ExecutionSubstrate, PayloadHandle, PendingRun, RuntimeEnv, SubstrateResult,
    WorkerHandle, WorkerOutcome, WorkerResources, WorkerSpec, WorkerTask,
};
