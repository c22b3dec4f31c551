use thiserror::Error;

/// Main error type for the DLM system
#[derive(Error, Debug)]
pub enum DlmError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("Worker failure: {0}")]
    Worker(#[from] WorkerFailure),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Invalid option combinations, rejected at construction time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Archive capacity must be positive, got {capacity}")]
    InvalidArchiveCapacity { capacity: usize },

    #[error("Mixing strength {mixing_strength} must lie in 1..={archive_capacity}")]
    InvalidMixingStrength {
        mixing_strength: usize,
        archive_capacity: usize,
    },

    #[error("At least {minimum} workers are required, got {worker_count}")]
    TooFewWorkers { worker_count: usize, minimum: usize },

    #[error("Per-round runtime must be at least {minimum_secs}s, got {runtime_secs}s")]
    RoundRuntimeTooShort { runtime_secs: f64, minimum_secs: f64 },

    #[error("Dimension mismatch for {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid bounds at coordinate {index}: lower {lower} exceeds upper {upper}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    #[error("Problem dimensionality must be positive")]
    EmptyProblem,

    #[error("Step-size must be positive and finite, got {sigma}")]
    InvalidSigma { sigma: f64 },

    #[error("Rate {name} must lie in (0, 1], got {value}")]
    InvalidRate { name: String, value: f64 },

    #[error("Population size must be at least 2, got {size}")]
    InvalidPopulation { size: usize },
}

/// Failures raised by the execution substrate itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubstrateError {
    #[error("Failed to connect to {address}: {message}")]
    Connection { address: String, message: String },

    #[error("Substrate is not connected")]
    NotConnected,

    #[error("Unknown payload handle: {id}")]
    UnknownPayload { id: String },

    #[error("Failed to spawn worker {worker}: {message}")]
    Spawn { worker: usize, message: String },
}

/// A worker that did not deliver a result at the gather barrier
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerFailure {
    #[error("Worker {worker} crashed before returning a result")]
    Crashed { worker: usize },

    #[error("Worker {worker} returned an error: {message}")]
    Errored { worker: usize, message: String },

    #[error("Worker {worker} did not return within {waited_ms} ms")]
    TimedOut { worker: usize, waited_ms: u64 },

    #[error("All {worker_count} workers failed in round {round}")]
    AllWorkersFailed { round: usize, worker_count: usize },
}

impl WorkerFailure {
    /// Index of the failing worker, if the failure concerns a single one.
    pub fn worker(&self) -> Option<usize> {
        match self {
            Self::Crashed { worker }
            | Self::Errored { worker, .. }
            | Self::TimedOut { worker, .. } => Some(*worker),
            Self::AllWorkersFailed { .. } => None,
        }
    }
}

/// Result type alias for DLM operations
pub type DlmResult<T> = Result<T, DlmError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::DlmError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::DlmError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidMixingStrength {
            mixing_strength: 6,
            archive_capacity: 4,
        };

        assert!(error.to_string().contains("Mixing strength"));
        assert!(error.to_string().contains('6'));
        assert!(error.to_string().contains('4'));
    }

    #[test]
    fn test_error_conversion() {
        let failure = WorkerFailure::Crashed { worker: 3 };
        let dlm_error: DlmError = failure.into();

        match dlm_error {
            DlmError::Worker(WorkerFailure::Crashed { worker }) => assert_eq!(worker, 3),
            _ => panic!("Expected Worker error"),
        }
    }

    #[test]
    fn test_worker_index() {
        assert_eq!(WorkerFailure::TimedOut { worker: 7, waited_ms: 10 }.worker(), Some(7));
        assert_eq!(
            WorkerFailure::AllWorkersFailed { round: 2, worker_count: 40 }.worker(),
            None
        );
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, DlmError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, DlmError::Internal(_)));
    }
}
