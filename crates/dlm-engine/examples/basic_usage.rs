use dlm_engine::LmEngine;
use dlm_types::{EngineConfig, Problem};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("DLM inner engine example");

    let dimension = 50;
    let ellipsoid = |x: &[f64]| {
        let n = x.len() as f64;
        x.iter()
            .enumerate()
            .map(|(i, v)| 1e6_f64.powf(i as f64 / (n - 1.0)) * v * v)
            .sum::<f64>()
    };
    let problem = Problem::uniform(Arc::new(ellipsoid), dimension, -10.0, 10.0)?;
    println!("Created problem: {:?}", problem);

    let archive = 2 * (dimension as f64).sqrt().ceil() as usize;
    let config = EngineConfig::new(archive)
        .with_seed(2022)
        .with_max_evaluations(200_000)
        .with_max_runtime(Duration::from_secs(30))
        .with_fitness_threshold(1e-10);

    let result = LmEngine::new(problem, config)?.run()?;

    println!("Termination: {:?}", result.termination);
    println!("Evaluations: {}", result.evaluations);
    println!("Best fitness: {:.3e}", result.best_fitness);
    println!("Final sigma: {:.3e}", result.final_state.sigma);
    for sample in result.fitness_trace.iter().step_by(50) {
        println!("  {:>8}  {:.3e}", sample.evaluations, sample.fitness);
    }

    Ok(())
}
