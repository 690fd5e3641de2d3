//! Backing numeric engines for the sepq lazy-entanglement simulator
//!
//! This crate holds everything that actually stores and transforms
//! amplitude buffers. The unit layer above (`sepq-unit`) treats a register
//! here as an opaque [`StateEngine`] and works to keep every register as
//! small as possible; this crate's job is to make the operations on
//! whatever registers do get materialized exact and cheap.
//!
//! # Engine selection
//!
//! Implementations form a closed set ([`EngineKind`]) chosen at allocation
//! time via [`make_engine`]. The shipped member is the dense CPU
//! state-vector register ([`DenseEngine`]); the capability probes on
//! [`StateEngine`] (`is_clifford`, `is_binary_decision_tree`) are the seam
//! where stabilizer or decision-diagram variants would slot in.

pub mod dense;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod state_vector;

pub use dense::DenseEngine;
pub use engine::{make_engine, EngineKind, StateEngine, NORM_EPSILON};
pub use error::{EngineError, Result};
pub use state_vector::{StateVector, MAX_QUBITS};
