//! Runs the distributed search on a benchmark objective with local workers.
//!
//! Settings come from the environment:
//! `DLM_DIMENSION`, `DLM_WORKERS`, `DLM_THREADS`, `DLM_ROUND_SECS`,
//! `DLM_MAX_SECS`, `DLM_THRESHOLD`, `DLM_SEED` and `DLM_OBJECTIVE`
//! (`sphere` or `ellipsoid`).

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dlm_optimizer::{ClusterConfig, LocalSubstrate, MetaCoordinator};
use dlm_types::{CoordinatorConfig, Objective, Problem};

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

struct Ellipsoid;

impl Objective for Ellipsoid {
    fn evaluate(&self, x: &[f64]) -> f64 {
        let scale = (x.len().max(2) - 1) as f64;
        x.iter()
            .enumerate()
            .map(|(i, v)| 1e6_f64.powf(i as f64 / scale) * v * v)
            .sum()
    }

    fn name(&self) -> &str {
        "ellipsoid"
    }
}

struct Sphere;

impl Objective for Sphere {
    fn evaluate(&self, x: &[f64]) -> f64 {
        x.iter().map(|v| v * v).sum()
    }

    fn name(&self) -> &str {
        "sphere"
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let dimension: usize = env_or("DLM_DIMENSION", 20)?;
    let workers: usize = env_or("DLM_WORKERS", 40)?;
    let threads: usize = env_or(
        "DLM_THREADS",
        std::thread::available_parallelism().map_or(4, |n| n.get()),
    )?;
    let round_secs: u64 = env_or("DLM_ROUND_SECS", 3)?;
    let max_secs: u64 = env_or("DLM_MAX_SECS", 30)?;
    let threshold: f64 = env_or("DLM_THRESHOLD", 1e-10)?;
    let objective: String = env_or("DLM_OBJECTIVE", "ellipsoid".to_string())?;

    let objective: Arc<dyn Objective> = match objective.as_str() {
        "sphere" => Arc::new(Sphere),
        "ellipsoid" => Arc::new(Ellipsoid),
        other => bail!("unknown objective {other:?}"),
    };
    let problem = Problem::uniform(objective, dimension, -10.0, 10.0)?;

    let mut config = CoordinatorConfig::new(workers, Duration::from_secs(round_secs))
        .with_max_runtime(Duration::from_secs(max_secs))
        .with_fitness_threshold(threshold);
    if let Ok(seed) = std::env::var("DLM_SEED") {
        config = config.with_seed(seed.parse().context("DLM_SEED must be an integer")?);
    }

    info!(?problem, workers, threads, "benchmark configured");
    let mut coordinator =
        MetaCoordinator::<LocalSubstrate>::connect(ClusterConfig::local(threads), problem, config)?;
    let report = coordinator.optimize()?;

    println!("termination : {:?}", report.termination);
    println!("rounds      : {}", report.rounds);
    println!("evaluations : {}", report.evaluations);
    println!("runtime     : {:.1}s", report.runtime.as_secs_f64());
    println!("best        : {:.3e}", report.best_fitness);
    for sample in &report.fitness_trace {
        println!("  {:>12}  {:.3e}", sample.evaluations, sample.fitness);
    }

    Ok(())
}
