//! Execution substrate interface and task descriptors for distributed rounds.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use dlm_types::{EngineConfig, Problem, RoundResult, SubstrateError, WorkerFailure};

/// Result alias for substrate operations.
pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// What a single worker delivers at the gather barrier.
pub type WorkerOutcome = Result<RoundResult, WorkerFailure>;

/// Configuration for connecting to an execution substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Substrate address (e.g. "local" or "ray://head:10001").
    pub address: String,

    /// Namespace for this optimization run.
    pub namespace: String,

    /// Environment forced onto every worker.
    pub runtime_env: RuntimeEnv,

    /// Resource requirements per worker.
    pub worker_resources: WorkerResources,

    /// Maximum number of workers executing at the same time.
    pub max_concurrent_workers: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address: "local".to_string(),
            namespace: "dlm".to_string(),
            runtime_env: RuntimeEnv::default(),
            worker_resources: WorkerResources::default(),
            max_concurrent_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl ClusterConfig {
    pub fn local(max_concurrent_workers: usize) -> Self {
        Self {
            max_concurrent_workers,
            ..Self::default()
        }
    }
}

/// Runtime environment for workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEnv {
    /// Working directory shared with workers.
    pub working_dir: Option<String>,
    /// Environment variables.
    pub env_vars: HashMap<String, String>,
}

impl Default for RuntimeEnv {
    /// Caps every numeric library at one thread so co-located workers do not
    /// oversubscribe the cores.
    fn default() -> Self {
        let env_vars = [
            "OPENBLAS_NUM_THREADS",
            "MKL_NUM_THREADS",
            "OMP_NUM_THREADS",
            "NUMEXPR_NUM_THREADS",
            "RAYON_NUM_THREADS",
        ]
        .into_iter()
        .map(|name| (name.to_string(), "1".to_string()))
        .collect();

        Self {
            working_dir: None,
            env_vars,
        }
    }
}

/// Resource requirements for a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResources {
    /// Number of CPUs per worker (fractional ok).
    pub num_cpus: f64,
    /// Memory in bytes (0 = no limit).
    pub memory_bytes: u64,
    /// Custom resource requirements.
    pub custom: HashMap<String, f64>,
}

impl Default for WorkerResources {
    fn default() -> Self {
        Self {
            num_cpus: 1.0,
            memory_bytes: 0,
            custom: HashMap::new(),
        }
    }
}

/// Where and how one worker of a round is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker index within the round (0-indexed).
    pub worker: usize,
    /// Round number (0-indexed).
    pub round: usize,
    pub resources: WorkerResources,
}

/// Describes a single inner-engine run to be dispatched to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    /// Unique task id.
    pub task_id: Uuid,

    /// Optimization run this task belongs to.
    pub run_id: Uuid,

    pub round: usize,
    pub worker: usize,

    /// Engine configuration, including the state to continue from.
    pub config: EngineConfig,

    /// Resource requirements for this specific task.
    pub resources: WorkerResources,
}

/// Handle to a read-only payload uploaded once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadHandle {
    pub id: Uuid,
}

/// A spawned worker that has not started running yet.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerHandle {
    pub task: WorkerTask,
}

/// The future of one running worker.
#[derive(Debug)]
pub struct PendingRun {
    worker: usize,
    task_id: Uuid,
    receiver: Receiver<WorkerOutcome>,
}

impl PendingRun {
    pub fn new(worker: usize, task_id: Uuid, receiver: Receiver<WorkerOutcome>) -> Self {
        Self {
            worker,
            task_id,
            receiver,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Block until the worker reports or `deadline` passes.
    pub fn wait(self, deadline: Option<Instant>) -> WorkerOutcome {
        let started = Instant::now();
        let received = match deadline {
            Some(deadline) => self.receiver.recv_deadline(deadline),
            None => self
                .receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(WorkerFailure::TimedOut {
                worker: self.worker,
                waited_ms: started.elapsed().as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerFailure::Crashed {
                worker: self.worker,
            }),
        }
    }
}

/// Generic parallel task dispatch used by the meta-coordinator.
///
/// Implementations may talk to a real cluster or run workers in-process
/// (see [`crate::LocalSubstrate`]).
pub trait ExecutionSubstrate: Send {
    /// Connect to the substrate described by `config`.
    fn connect(config: ClusterConfig) -> SubstrateResult<Self>
    where
        Self: Sized;

    /// Share the problem with all workers; called once per run.
    fn upload(&mut self, problem: Problem) -> SubstrateResult<PayloadHandle>;

    /// Place one worker with its configuration.
    fn spawn(&mut self, spec: WorkerSpec, config: EngineConfig) -> SubstrateResult<WorkerHandle>;

    /// Start a spawned worker against a shared payload.
    fn run(&mut self, worker: WorkerHandle, payload: &PayloadHandle) -> SubstrateResult<PendingRun>;

    /// Wait for every pending run. Outcomes are returned in submission order.
    fn gather(
        &mut self,
        pending: Vec<PendingRun>,
        timeout: Option<Duration>,
    ) -> SubstrateResult<Vec<WorkerOutcome>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        Ok(pending.into_iter().map(|run| run.wait(deadline)).collect())
    }

    /// Release all substrate resources.
    fn shutdown(&mut self) -> SubstrateResult<()>;
}
