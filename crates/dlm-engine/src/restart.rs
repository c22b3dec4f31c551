//! Restart criteria deciding when a search state should be rebuilt.

use crate::state::SearchState;

/// Decides after each generation whether the engine should restart.
pub trait RestartCriterion: Send {
    /// Observe the generation just completed; `true` requests a restart.
    fn should_restart(&mut self, state: &SearchState, generation_best: f64) -> bool;

    /// Forget all history (called after a restart).
    fn reset(&mut self);
}

/// Restarts when the step-size collapses or the best fitness stagnates.
#[derive(Debug, Clone)]
pub struct StagnationCriterion {
    window: usize,
    fitness_diff: f64,
    sigma_threshold: f64,
    history: Vec<f64>,
}

impl StagnationCriterion {
    pub fn new(window: usize, fitness_diff: f64, sigma_threshold: f64) -> Self {
        Self {
            window: window.max(1),
            fitness_diff,
            sigma_threshold,
            history: vec![f64::INFINITY],
        }
    }
}

impl RestartCriterion for StagnationCriterion {
    fn should_restart(&mut self, state: &SearchState, generation_best: f64) -> bool {
        let last = self.history.last().copied().unwrap_or(f64::INFINITY);
        self.history.push(generation_best.min(last));

        if state.sigma < self.sigma_threshold {
            return true;
        }
        let len = self.history.len();
        len >= self.window
            && self.history[len - self.window] - self.history[len - 1] < self.fitness_diff
    }

    fn reset(&mut self) {
        self.history.clear();
        self.history.push(f64::INFINITY);
    }
}

/// Never restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRestart;

impl RestartCriterion for NoRestart {
    fn should_restart(&mut self, _state: &SearchState, _generation_best: f64) -> bool {
        false
    }

    fn reset(&mut self) {}
}
