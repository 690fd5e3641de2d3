//! Lazy entanglement management for classical quantum simulation
//!
//! Full simulation cost grows exponentially with the number of mutually
//! entangled qubits, so the dominant engineering problem is not the
//! numeric kernels — it is never materializing more joint state than an
//! operation strictly requires. This crate is that management layer:
//!
//! - every logical qubit is a [`Shard`] that starts separable and carries
//!   its own cached amplitude pair, expressed in whichever Pauli frame
//!   ([`Pauli`]) lets recent gates be labels instead of arithmetic;
//! - single-control phase and inversion gates between qubits in different
//!   backing units are deferred into a phase buffer graph
//!   ([`PhaseRelation`]) and combined algebraically, not executed;
//! - when a joint operation is finally unavoidable, the Entangler merges
//!   exactly the units involved, and the Separator works continuously to
//!   undo that damage, probing reduced Bloch vectors and detaching any
//!   qubit that proves to be back in a product state.
//!
//! The numeric heavy lifting lives behind the
//! [`StateEngine`](sepq_engine::StateEngine) capability interface in
//! `sepq-engine`.
//!
//! # Example
//!
//! ```
//! use sepq_unit::{QubitRegister, RegisterConfig};
//!
//! let mut reg = QubitRegister::new(2, 0, RegisterConfig::seeded(42));
//! reg.h(0).unwrap();
//! // Still no backing engine: H was a frame relabel.
//! assert_eq!(reg.stats().engine_allocations, 0);
//!
//! // CNOT genuinely entangles; now exactly one unit exists.
//! reg.mc_invert(&[0], num_complex::Complex64::new(1.0, 0.0),
//!     num_complex::Complex64::new(1.0, 0.0), 1).unwrap();
//! assert!((reg.prob(1).unwrap() - 0.5).abs() < 1e-9);
//! ```

pub mod buffers;
pub mod compose;
pub mod config;
pub mod controlled;
pub mod entangle;
pub mod error;
pub mod map;
pub mod measure;
pub mod register;
pub mod revert;
pub mod separate;
pub mod shard;
pub mod telemetry;

pub use config::{RegisterConfig, DEFAULT_SEPARABILITY_THRESHOLD};
pub use error::{RegisterError, Result};
pub use map::ShardMap;
pub use register::QubitRegister;
pub use shard::{Pauli, PhaseRelation, Shard, UnitId};
pub use telemetry::RegisterStats;
