//! Problem descriptor: the objective to minimize and its box constraints.

use std::fmt;
use std::sync::Arc;

use crate::errors::{ConfigError, DlmResult};

/// A black-box objective to be minimized.
///
/// Implemented for any `Fn(&[f64]) -> f64` closure that is safe to share
/// across worker threads.
pub trait Objective: Send + Sync {
    /// Evaluate the objective at `x`.
    fn evaluate(&self, x: &[f64]) -> f64;

    /// Human-readable objective name.
    fn name(&self) -> &str {
        "objective"
    }
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &[f64]) -> f64 {
        self(x)
    }
}

/// Immutable description of one optimization problem.
#[derive(Clone)]
pub struct Problem {
    objective: Arc<dyn Objective>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Problem {
    /// Create a problem with per-coordinate bounds.
    pub fn new(
        objective: Arc<dyn Objective>,
        lower: Vec<f64>,
        upper: Vec<f64>,
    ) -> DlmResult<Self> {
        if lower.is_empty() {
            return Err(ConfigError::EmptyProblem.into());
        }
        if lower.len() != upper.len() {
            return Err(ConfigError::DimensionMismatch {
                field: "upper".to_string(),
                expected: lower.len(),
                actual: upper.len(),
            }
            .into());
        }
        for (index, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            if !(lo <= hi) {
                return Err(ConfigError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                }
                .into());
            }
        }

        Ok(Self {
            objective,
            lower,
            upper,
        })
    }

    /// Create a problem whose every coordinate shares the same bounds.
    pub fn uniform(
        objective: Arc<dyn Objective>,
        dimension: usize,
        lower: f64,
        upper: f64,
    ) -> DlmResult<Self> {
        Self::new(objective, vec![lower; dimension], vec![upper; dimension])
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn objective(&self) -> &Arc<dyn Objective> {
        &self.objective
    }

    /// Evaluate the objective at `x`.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.objective.evaluate(x)
    }

    /// Largest per-coordinate range, used to scale step-sizes.
    pub fn max_range(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .fold(0.0, f64::max)
    }
}

impl fmt::Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("objective", &self.objective.name())
            .field("dimension", &self.dimension())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DlmError;

    fn sphere() -> Arc<dyn Objective> {
        Arc::new(|x: &[f64]| x.iter().map(|v| v * v).sum::<f64>())
    }

    #[test]
    fn uniform_problem_has_expected_shape() {
        let problem = Problem::uniform(sphere(), 4, -10.0, 10.0).unwrap();
        assert_eq!(problem.dimension(), 4);
        assert_eq!(problem.max_range(), 20.0);
        assert_eq!(problem.evaluate(&[1.0, 2.0, 0.0, 0.0]), 5.0);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = Problem::new(sphere(), vec![0.0, 1.0], vec![1.0, 0.0]).unwrap_err();
        match err {
            DlmError::Config(ConfigError::InvalidBounds { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_mismatched_bounds() {
        let err = Problem::new(sphere(), vec![0.0; 3], vec![1.0; 2]).unwrap_err();
        assert!(matches!(
            err,
            DlmError::Config(ConfigError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn rejects_empty_problem() {
        let err = Problem::new(sphere(), vec![], vec![]).unwrap_err();
        assert!(matches!(err, DlmError::Config(ConfigError::EmptyProblem)));
    }
}
