//! Evaluation bookkeeping: budgets, best-so-far and the convergence trace.

use std::time::{Duration, Instant};

use dlm_types::{Problem, TerminationReason, TraceSample};

use crate::params::Limits;

/// Counts evaluations, tracks the best-so-far solution and decides termination.
#[derive(Debug, Clone)]
pub struct EvaluationTracker {
    limits: Limits,
    started: Instant,
    evaluations: u64,
    evaluation_time: Duration,
    best_solution: Vec<f64>,
    best_fitness: f64,
    trace_interval: u64,
    trace: Vec<TraceSample>,
}

impl EvaluationTracker {
    pub fn new(limits: Limits, dimension: usize, trace_interval: u64) -> Self {
        Self {
            limits,
            started: Instant::now(),
            evaluations: 0,
            evaluation_time: Duration::ZERO,
            best_solution: vec![0.0; dimension],
            best_fitness: f64::INFINITY,
            trace_interval: trace_interval.max(1),
            trace: Vec::new(),
        }
    }

    /// Evaluate `x`, updating counters, best-so-far and trace.
    pub fn evaluate(&mut self, problem: &Problem, x: &[f64]) -> f64 {
        let start = Instant::now();
        let y = problem.evaluate(x);
        self.evaluation_time += start.elapsed();
        self.evaluations += 1;

        if y < self.best_fitness {
            self.best_fitness = y;
            self.best_solution.copy_from_slice(x);
        }
        if self.evaluations == 1 || self.evaluations % self.trace_interval == 0 {
            self.push_sample();
        }
        y
    }

    /// First stopping condition that currently holds, if any.
    pub fn check(&self) -> Option<TerminationReason> {
        if let Some(max) = self.limits.max_evaluations {
            if self.evaluations >= max {
                return Some(TerminationReason::MaxEvaluations);
            }
        }
        if let Some(max) = self.limits.max_runtime {
            if self.started.elapsed() >= max {
                return Some(TerminationReason::MaxRuntime);
            }
        }
        if let Some(threshold) = self.limits.fitness_threshold {
            if self.best_fitness < threshold {
                return Some(TerminationReason::FitnessThreshold);
            }
        }
        None
    }

    /// Close the trace with a sample at the final evaluation.
    pub fn finish(&mut self) {
        let last = self.trace.last().map(|s| s.evaluations);
        if self.evaluations > 0 && last != Some(self.evaluations) {
            self.push_sample();
        }
    }

    fn push_sample(&mut self) {
        self.trace.push(TraceSample {
            evaluations: self.evaluations,
            fitness: self.best_fitness,
        });
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn evaluation_time(&self) -> Duration {
        self.evaluation_time
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn best_solution(&self) -> &[f64] {
        &self.best_solution
    }

    pub fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    pub fn trace(&self) -> &[TraceSample] {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn problem() -> Problem {
        Problem::uniform(Arc::new(|x: &[f64]| x[0].abs()), 1, -10.0, 10.0).unwrap()
    }

    #[test]
    fn tracks_best_so_far() {
        let problem = problem();
        let mut tracker = EvaluationTracker::new(Limits::default(), 1, 100);
        tracker.evaluate(&problem, &[3.0]);
        tracker.evaluate(&problem, &[-1.0]);
        tracker.evaluate(&problem, &[2.0]);

        assert_eq!(tracker.evaluations(), 3);
        assert_eq!(tracker.best_fitness(), 1.0);
        assert_eq!(tracker.best_solution(), &[-1.0]);
        assert!(tracker.check().is_none());
    }

    #[test]
    fn evaluation_budget_terminates() {
        let problem = problem();
        let limits = Limits {
            max_evaluations: Some(2),
            ..Limits::default()
        };
        let mut tracker = EvaluationTracker::new(limits, 1, 100);
        tracker.evaluate(&problem, &[5.0]);
        assert!(tracker.check().is_none());
        tracker.evaluate(&problem, &[4.0]);
        assert_eq!(tracker.check(), Some(TerminationReason::MaxEvaluations));
    }

    #[test]
    fn fitness_threshold_terminates() {
        let problem = problem();
        let limits = Limits {
            fitness_threshold: Some(0.5),
            ..Limits::default()
        };
        let mut tracker = EvaluationTracker::new(limits, 1, 100);
        tracker.evaluate(&problem, &[0.1]);
        assert_eq!(tracker.check(), Some(TerminationReason::FitnessThreshold));
    }

    #[test]
    fn trace_samples_first_stride_and_last() {
        let problem = problem();
        let mut tracker = EvaluationTracker::new(Limits::default(), 1, 10);
        for i in 0..25 {
            tracker.evaluate(&problem, &[10.0 - i as f64 * 0.1]);
        }
        tracker.finish();

        let at: Vec<u64> = tracker.trace().iter().map(|s| s.evaluations).collect();
        assert_eq!(at, vec![1, 10, 20, 25]);
        assert!(tracker.trace().windows(2).all(|w| w[1].fitness <= w[0].fitness));
    }
}
