//! Mutable search state of a single inner engine.

use dlm_types::SearchSnapshot;

use crate::archive::Archive;

/// Distribution state owned by one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub mean: Vec<f64>,
    /// Evolution path.
    pub path: Vec<f64>,
    /// Accumulated paired-test statistic driving the step-size.
    pub step_control: f64,
    pub sigma: f64,
    /// Generations completed since the last (re)initialization.
    pub generation: u64,
    pub archive: Archive,
}

impl SearchState {
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            mean: self.mean.clone(),
            path: self.path.clone(),
            step_control: self.step_control,
            sigma: self.sigma,
            archive: self.archive.vectors().to_vec(),
        }
    }
}

/// Offspring buffer reused across generations.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    pub members: Vec<Vec<f64>>,
    pub fitness: Vec<f64>,
    /// Members evaluated in the current generation.
    pub evaluated: usize,
}

impl Population {
    /// Buffer of `size` members, every fitness set to `baseline`.
    pub fn new(size: usize, dimension: usize, baseline: f64) -> Self {
        Self {
            members: vec![vec![0.0; dimension]; size],
            fitness: vec![baseline; size],
            evaluated: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.evaluated == self.members.len()
    }

    /// Member indices ordered by ascending fitness.
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.fitness.len()).collect();
        order.sort_by(|&a, &b| self.fitness[a].total_cmp(&self.fitness[b]));
        order
    }

    /// Fitness values in ascending order.
    pub fn ranked_fitness(&self) -> Vec<f64> {
        let mut sorted = self.fitness.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    /// Best fitness of the members evaluated so far this generation.
    pub fn best_fitness(&self) -> f64 {
        self.fitness[..self.evaluated]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_is_ascending() {
        let mut population = Population::new(4, 2, 0.0);
        population.fitness = vec![3.0, -1.0, 2.0, 0.5];
        population.evaluated = 4;

        assert_eq!(population.ranking(), vec![1, 3, 2, 0]);
        assert_eq!(population.ranked_fitness(), vec![-1.0, 0.5, 2.0, 3.0]);
        assert_eq!(population.best_fitness(), -1.0);
        assert!(population.is_complete());
    }

    #[test]
    fn partial_population_best_ignores_stale_entries() {
        let mut population = Population::new(3, 1, -10.0);
        population.fitness[0] = 4.0;
        population.evaluated = 1;

        assert_eq!(population.best_fitness(), 4.0);
        assert!(!population.is_complete());
    }

    #[test]
    fn snapshot_copies_archive() {
        let state = SearchState {
            mean: vec![1.0, 2.0],
            path: vec![0.0, 0.0],
            step_control: 0.25,
            sigma: 0.5,
            generation: 3,
            archive: Archive::from_vectors(vec![vec![1.0, 1.0], vec![2.0, 2.0]], 2).unwrap(),
        };
        let snapshot = state.snapshot();
        assert_eq!(snapshot.archive_size(), 2);
        assert_eq!(snapshot.archive[1], vec![2.0, 2.0]);
        assert_eq!(snapshot.step_control, 0.25);
    }
}
