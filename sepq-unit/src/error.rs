//! Error types for the unit layer

use sepq_engine::EngineError;
use thiserror::Error;

/// Errors that can occur in the lazy entanglement layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegisterError {
    /// Logical qubit index out of range
    #[error("invalid qubit index {index} for {num_qubits}-qubit register")]
    InvalidQubitIndex { index: usize, num_qubits: usize },

    /// Two registers of different widths where equal widths are required
    #[error("register size mismatch: expected {expected} qubits, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Failure inside a backing engine, allocation failures included
    ///
    /// Allocation failures propagate uncaught; an affected unit must be
    /// treated as unusable (no partial rollback is attempted).
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for unit-layer operations
pub type Result<T> = std::result::Result<T, RegisterError>;
