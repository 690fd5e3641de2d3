//! Error types for backing-engine operations

use thiserror::Error;

/// Errors that can occur inside a backing engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine cannot provide the memory a requested register size needs.
    ///
    /// Fatal and never retried automatically. The mitigation is preventive:
    /// the unit layer avoids allocating and entangling whenever provably
    /// unnecessary, and shrinks registers eagerly after measurement.
    #[error("failed to allocate {size} bytes for a {num_qubits}-qubit register")]
    AllocationFailure { size: usize, num_qubits: usize },

    /// Qubit index out of range for this register
    #[error("invalid qubit index {index} for {num_qubits}-qubit register")]
    InvalidQubitIndex { index: usize, num_qubits: usize },

    /// Amplitude buffer length does not match the register dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A measurement was forced to an outcome of (numerically) zero probability
    #[error("cannot force qubit {index} to an outcome of zero probability")]
    ImpossibleOutcome { index: usize },

    /// A capability this engine variant does not implement
    #[error("unsupported engine capability: {0}")]
    Unsupported(&'static str),
}

/// Result type for backing-engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
