//! In-process execution substrate backed by a rayon thread pool.

use crossbeam_channel::bounded;
use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dlm_types::{EngineConfig, Problem, SubstrateError, WorkerFailure};

use crate::substrate::{
    ClusterConfig, ExecutionSubstrate, PayloadHandle, PendingRun, SubstrateResult, WorkerHandle,
    WorkerSpec, WorkerTask,
};

/// Runs every worker on a dedicated thread pool inside the current process.
///
/// Accepts addresses starting with `local`.
pub struct LocalSubstrate {
    config: ClusterConfig,
    run_id: Uuid,
    pool: Option<ThreadPool>,
    payloads: RwLock<HashMap<Uuid, Arc<Problem>>>,
}

impl LocalSubstrate {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    fn pool(&self) -> SubstrateResult<&ThreadPool> {
        self.pool.as_ref().ok_or(SubstrateError::NotConnected)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl ExecutionSubstrate for LocalSubstrate {
    fn connect(config: ClusterConfig) -> SubstrateResult<Self> {
        if !config.address.starts_with("local") {
            return Err(SubstrateError::Connection {
                address: config.address.clone(),
                message: "local substrate only accepts `local` addresses".to_string(),
            });
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_workers.max(1))
            .thread_name(|i| format!("dlm-worker-{i}"))
            .panic_handler(|payload| {
                warn!(message = panic_message(payload.as_ref()), "worker panicked");
            })
            .build()
            .map_err(|e| SubstrateError::Connection {
                address: config.address.clone(),
                message: e.to_string(),
            })?;

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            namespace = %config.namespace,
            threads = pool.current_num_threads(),
            "local substrate connected"
        );
        debug!(env = ?config.runtime_env.env_vars, "worker runtime environment");

        Ok(Self {
            config,
            run_id,
            pool: Some(pool),
            payloads: RwLock::new(HashMap::new()),
        })
    }

    fn upload(&mut self, problem: Problem) -> SubstrateResult<PayloadHandle> {
        self.pool()?;
        let id = Uuid::new_v4();
        self.payloads.write().insert(id, Arc::new(problem));
        debug!(%id, "payload uploaded");
        Ok(PayloadHandle { id })
    }

    fn spawn(&mut self, spec: WorkerSpec, config: EngineConfig) -> SubstrateResult<WorkerHandle> {
        self.pool().map_err(|_| SubstrateError::Spawn {
            worker: spec.worker,
            message: "substrate is shut down".to_string(),
        })?;

        Ok(WorkerHandle {
            task: WorkerTask {
                task_id: Uuid::new_v4(),
                run_id: self.run_id,
                round: spec.round,
                worker: spec.worker,
                config,
                resources: spec.resources,
            },
        })
    }

    fn run(&mut self, worker: WorkerHandle, payload: &PayloadHandle) -> SubstrateResult<PendingRun> {
        let problem = self
            .payloads
            .read()
            .get(&payload.id)
            .cloned()
            .ok_or_else(|| SubstrateError::UnknownPayload {
                id: payload.id.to_string(),
            })?;
        let pool = self.pool()?;

        let WorkerTask {
            task_id,
            worker: index,
            config,
            ..
        } = worker.task;
        let (tx, rx) = bounded(1);
        pool.spawn(move || {
            let outcome = dlm_engine::run_worker(Problem::clone(&problem), config, index)
                .map_err(|e| WorkerFailure::Errored {
                    worker: index,
                    message: e.to_string(),
                });
            // the receiver may have given up at its deadline
            let _ = tx.send(outcome);
        });

        Ok(PendingRun::new(index, task_id, rx))
    }

    fn shutdown(&mut self) -> SubstrateResult<()> {
        if self.pool.take().is_none() {
            return Err(SubstrateError::NotConnected);
        }
        self.payloads.write().clear();
        info!(run_id = %self.run_id, "local substrate shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::WorkerResources;
    use std::time::Duration;

    fn sphere(n: usize) -> Problem {
        Problem::uniform(
            Arc::new(|x: &[f64]| x.iter().map(|v| v * v).sum::<f64>()),
            n,
            -5.0,
            5.0,
        )
        .unwrap()
    }

    fn spec(worker: usize) -> WorkerSpec {
        WorkerSpec {
            worker,
            round: 0,
            resources: WorkerResources::default(),
        }
    }

    #[test]
    fn runs_workers_and_gathers_in_submission_order() {
        let mut substrate = LocalSubstrate::connect(ClusterConfig::local(3)).unwrap();
        let payload = substrate.upload(sphere(4)).unwrap();

        let pending: Vec<PendingRun> = (0..6)
            .map(|i| {
                let config = EngineConfig::new(3).with_seed(i as u64).with_max_evaluations(200);
                let handle = substrate.spawn(spec(i), config).unwrap();
                substrate.run(handle, &payload).unwrap()
            })
            .collect();

        let outcomes = substrate.gather(pending, None).unwrap();
        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            let result = outcome.as_ref().unwrap();
            assert_eq!(result.worker, i);
            assert_eq!(result.evaluations, 200);
        }
        substrate.shutdown().unwrap();
    }

    #[test]
    fn panicking_objective_surfaces_as_crash() {
        let mut substrate = LocalSubstrate::connect(ClusterConfig::local(2)).unwrap();
        let problem = Problem::uniform(
            Arc::new(|_: &[f64]| -> f64 { panic!("objective exploded") }),
            3,
            -1.0,
            1.0,
        )
        .unwrap();
        let payload = substrate.upload(problem).unwrap();
        let handle = substrate.spawn(spec(5), EngineConfig::new(2)).unwrap();
        let pending = substrate.run(handle, &payload).unwrap();

        let outcomes = substrate
            .gather(vec![pending], Some(Duration::from_secs(30)))
            .unwrap();
        assert_eq!(outcomes[0], Err(WorkerFailure::Crashed { worker: 5 }));
    }

    #[test]
    fn engine_errors_surface_as_errored() {
        let mut substrate = LocalSubstrate::connect(ClusterConfig::local(1)).unwrap();
        let payload = substrate.upload(sphere(3)).unwrap();
        let handle = substrate.spawn(spec(2), EngineConfig::new(0)).unwrap();
        let pending = substrate.run(handle, &payload).unwrap();

        match pending.wait(None) {
            Err(WorkerFailure::Errored { worker, message }) => {
                assert_eq!(worker, 2);
                assert!(message.contains("Archive capacity"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn rejects_remote_addresses_and_unknown_payloads() {
        let config = ClusterConfig {
            address: "ray://head:10001".to_string(),
            ..ClusterConfig::default()
        };
        assert!(matches!(
            LocalSubstrate::connect(config),
            Err(SubstrateError::Connection { .. })
        ));

        let mut substrate = LocalSubstrate::connect(ClusterConfig::local(1)).unwrap();
        let handle = substrate.spawn(spec(0), EngineConfig::new(2)).unwrap();
        let missing = PayloadHandle { id: Uuid::new_v4() };
        assert!(matches!(
            substrate.run(handle, &missing),
            Err(SubstrateError::UnknownPayload { .. })
        ));
    }

    #[test]
    fn shut_down_substrate_refuses_work() {
        let mut substrate = LocalSubstrate::connect(ClusterConfig::local(1)).unwrap();
        substrate.shutdown().unwrap();

        assert!(!substrate.is_connected());
        assert_eq!(substrate.upload(sphere(2)), Err(SubstrateError::NotConnected));
        assert!(matches!(
            substrate.spawn(spec(0), EngineConfig::new(2)),
            Err(SubstrateError::Spawn { worker: 0, .. })
        ));
        assert_eq!(substrate.shutdown(), Err(SubstrateError::NotConnected));
    }
}
