//! Per-worker ledger and the weighted meta aggregate computed from the
//! top-ranked workers of a round.

use dlm_types::RoundResult;

use crate::partition::WorkerPlan;

/// Rank weights over the top `outer` workers.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationWeights {
    /// Log-decay weights summing to one, used for the mean and archive size.
    pub mean: Vec<f64>,
    /// The same weights scaled to unit L2 norm, used for variance-like terms.
    pub magnitude: Vec<f64>,
}

impl AggregationWeights {
    pub fn new(outer: usize) -> Self {
        let base = (2.0 * outer as f64 + 1.0).ln();
        let raw: Vec<f64> = (0..outer).map(|i| base - (i as f64 + 1.0).ln()).collect();
        let total: f64 = raw.iter().sum();
        let mean: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let norm = mean.iter().map(|w| w * w).sum::<f64>().sqrt();
        let magnitude = mean.iter().map(|w| w / norm).collect();
        Self { mean, magnitude }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Fixed `m_max × n` arena of archive rows kept per worker index.
///
/// An archive of size `m` occupies the trailing `m` rows; rows in front of it
/// keep whatever an earlier, larger archive left there.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveBank {
    rows: Vec<Vec<f64>>,
}

impl ArchiveBank {
    pub fn new(capacity: usize, dimension: usize) -> Self {
        Self {
            rows: vec![vec![0.0; dimension]; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// The trailing `size` rows (clamped to capacity).
    pub fn trailing(&self, size: usize) -> &[Vec<f64>] {
        &self.rows[self.rows.len() - size.min(self.rows.len())..]
    }

    /// Overwrite the trailing rows with `archive`.
    pub fn store_trailing(&mut self, archive: &[Vec<f64>]) {
        let size = archive.len().min(self.rows.len());
        let start = self.rows.len() - size;
        for (row, vector) in self.rows[start..].iter_mut().zip(&archive[archive.len() - size..]) {
            row.copy_from_slice(vector);
        }
    }

    /// Add `weight ×` the trailing `size` rows of `other` onto the same rows here.
    fn accumulate_trailing(&mut self, other: &ArchiveBank, size: usize, weight: f64) {
        let size = size.min(self.rows.len()).min(other.rows.len());
        let start = self.rows.len() - size;
        for (row, source) in self.rows[start..].iter_mut().zip(other.trailing(size)) {
            for (acc, v) in row.iter_mut().zip(source) {
                *acc += weight * v;
            }
        }
    }
}

/// What the coordinator remembers about one worker index between rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    /// Best-so-far solution of the last run, used as the next mean.
    pub solution: Vec<f64>,
    pub fitness: f64,
    pub path: Vec<f64>,
    pub step_control: f64,
    pub sigma: f64,
    pub archive_size: usize,
    pub bank: ArchiveBank,
}

impl WorkerRecord {
    /// Ledger entry for a worker that has only been planned so far.
    ///
    /// The fitness is `+∞` until a result is absorbed, so a worker that never
    /// reports ranks last.
    pub fn planned(plan: &WorkerPlan, bank_capacity: usize) -> Self {
        let mut bank = ArchiveBank::new(bank_capacity, plan.mean.len());
        bank.store_trailing(&plan.archive);
        Self {
            solution: plan.mean.clone(),
            fitness: f64::INFINITY,
            path: plan.path.clone(),
            step_control: plan.step_control,
            sigma: plan.sigma,
            archive_size: plan.archive_size(),
            bank,
        }
    }

    /// Reset to the dispatched plan, keeping bank rows in front of its archive.
    pub fn replan(&mut self, plan: &WorkerPlan) {
        self.solution.clone_from(&plan.mean);
        self.fitness = f64::INFINITY;
        self.path.clone_from(&plan.path);
        self.step_control = plan.step_control;
        self.sigma = plan.sigma;
        self.archive_size = plan.archive_size();
        self.bank.store_trailing(&plan.archive);
    }

    /// Take over the outcome of a finished run.
    pub fn absorb(&mut self, result: &RoundResult) {
        let state = &result.final_state;
        self.solution.clone_from(&result.best_solution);
        self.fitness = result.best_fitness;
        self.path.clone_from(&state.path);
        self.step_control = state.step_control;
        self.sigma = state.sigma;
        self.archive_size = state.archive_size();
        self.bank.store_trailing(&state.archive);
    }
}

/// Weighted multi-recombination of the top-ranked workers.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaAggregate {
    pub mean: Vec<f64>,
    pub path: Vec<f64>,
    pub step_control: f64,
    pub sigma: f64,
    pub archive: ArchiveBank,
    /// Convex combination of the contributing archive sizes.
    pub archive_size: f64,
}

impl MetaAggregate {
    /// Aggregate the workers listed in `top`, best first.
    ///
    /// Only the first `min(top.len(), weights.len())` workers contribute.
    pub fn compute(records: &[WorkerRecord], top: &[usize], weights: &AggregationWeights) -> Self {
        let n = records.first().map_or(0, |r| r.solution.len());
        let capacity = records.first().map_or(0, |r| r.bank.capacity());
        let mut meta = Self {
            mean: vec![0.0; n],
            path: vec![0.0; n],
            step_control: 0.0,
            sigma: 0.0,
            archive: ArchiveBank::new(capacity, n),
            archive_size: 0.0,
        };

        for ((&worker, &w), &ww) in top.iter().zip(&weights.mean).zip(&weights.magnitude) {
            let record = &records[worker];
            for (acc, x) in meta.mean.iter_mut().zip(&record.solution) {
                *acc += w * x;
            }
            for (acc, p) in meta.path.iter_mut().zip(&record.path) {
                *acc += ww * p;
            }
            meta.step_control += ww * record.step_control;
            meta.sigma += ww * record.sigma;
            meta.archive_size += w * record.archive_size as f64;
            meta.archive
                .accumulate_trailing(&record.bank, record.archive_size, ww);
        }
        meta
    }
}
