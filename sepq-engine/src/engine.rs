//! The backing-engine capability interface
//!
//! A backing engine is an opaque multi-qubit numeric register. The unit
//! layer above never looks inside one; it only drives this closed
//! capability set and asks the two representation probes when a decision
//! depends on the engine family (e.g. delegating separability tests to a
//! stabilizer engine). Engine selection happens once, at allocation, through
//! [`EngineKind`] and [`make_engine`] — there is no inheritance hierarchy to
//! extend, only this trait and its fixed set of implementations.

use crate::error::{EngineError, Result};
use ahash::AHashMap;
use num_complex::Complex64;

/// Tolerance below which an amplitude norm is treated as exactly zero
pub const NORM_EPSILON: f64 = 1e-12;

/// The closed set of engine implementations selectable at allocation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// CPU state-vector register (dense, exact)
    DenseCpu,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::DenseCpu => write!(f, "dense-cpu"),
        }
    }
}

/// Capability set required of a backing register
///
/// Qubit indices are engine-local (`0..qubit_count()`); the unit layer owns
/// the mapping from logical qubits to engine slots. Void operations may be
/// queued by an asynchronous engine; any value-returning call must first
/// [`finish`](StateEngine::finish) outstanding work for this register.
pub trait StateEngine: Send {
    /// Which implementation this register is
    fn kind(&self) -> EngineKind;

    /// Current register width in qubits
    fn qubit_count(&self) -> usize;

    /// Tensor `other` onto this register, above the existing qubits
    ///
    /// Returns the slot at which `other`'s qubit 0 now lives.
    fn compose(&mut self, other: &dyn StateEngine) -> Result<usize>;

    /// Split the contiguous range starting at `start` (width taken from
    /// `dest`) out of this register and into `dest`
    ///
    /// The caller guarantees the range is separable from the remainder.
    fn decompose(&mut self, start: usize, dest: &mut dyn StateEngine) -> Result<()>;

    /// Drop the contiguous range `[start, start + length)`
    ///
    /// With `known_value`, the caller has already established the range's
    /// classical value and the engine projects onto it. Without one, the
    /// caller still guarantees the range is separable; the engine factors
    /// it off and discards it.
    fn dispose(&mut self, start: usize, length: usize, known_value: Option<u64>) -> Result<()>;

    /// Attempt [`decompose`](StateEngine::decompose) under a tolerance;
    /// on failure the register is left untouched and `false` is returned
    fn try_decompose(
        &mut self,
        start: usize,
        dest: &mut dyn StateEngine,
        tolerance: f64,
    ) -> Result<bool>;

    /// Deep, independent copy
    fn clone_boxed(&self) -> Box<dyn StateEngine>;

    /// Read the full amplitude vector
    fn get_quantum_state(&self) -> Vec<Complex64>;

    /// Overwrite the full amplitude vector
    fn set_quantum_state(&mut self, amplitudes: &[Complex64]) -> Result<()>;

    /// Amplitude of one basis state
    fn get_amplitude(&self, perm: u64) -> Result<Complex64>;

    /// Probability that `index` reads 1
    fn prob(&self, index: usize) -> Result<f64>;

    /// Measure `index`, optionally forcing the outcome, optionally
    /// collapsing the state
    fn force_m(&mut self, index: usize, result: bool, do_force: bool, do_apply: bool)
        -> Result<bool>;

    /// Sample the joint marginal distribution of the engine-local bit masks
    /// in `q_powers`, `shots` times, without collapsing
    ///
    /// Key bit `i` of each returned entry reports the bit selected by
    /// `q_powers[i]`.
    fn multi_shot_measure_mask(&mut self, q_powers: &[u64], shots: u32)
        -> Result<AHashMap<u64, u32>>;

    /// Apply a 2×2 matrix to `target`
    fn mtrx(&mut self, mtrx: &[Complex64; 4], target: usize) -> Result<()>;

    /// Apply `diag(top_left, bottom_right)` to `target`
    fn phase(&mut self, top_left: Complex64, bottom_right: Complex64, target: usize) -> Result<()> {
        self.mtrx(
            &[
                top_left,
                Complex64::new(0.0, 0.0),
                Complex64::new(0.0, 0.0),
                bottom_right,
            ],
            target,
        )
    }

    /// Apply `[[0, top_right], [bottom_left, 0]]` to `target`
    fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.mtrx(
            &[
                Complex64::new(0.0, 0.0),
                top_right,
                bottom_left,
                Complex64::new(0.0, 0.0),
            ],
            target,
        )
    }

    /// Apply a 2×2 matrix to `target` under normal controls
    fn mc_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize) -> Result<()>;

    /// Apply a 2×2 matrix to `target` under anti-controls
    fn mac_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize) -> Result<()>;

    /// Exchange two qubits
    fn swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()>;

    /// Swap plus an `i` phase on the exchanged branch
    fn iswap(&mut self, qubit1: usize, qubit2: usize) -> Result<()>;

    /// Inverse of [`iswap`](StateEngine::iswap)
    fn iswap_inv(&mut self, qubit1: usize, qubit2: usize) -> Result<()>;

    /// Square root of swap
    fn sqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()>;

    /// Inverse square root of swap
    fn isqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()>;

    /// Swap two qubits under (anti-)controls
    fn mc_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize, anti: bool)
        -> Result<()>;

    /// Square root (or inverse square root) of swap under (anti-)controls
    fn mc_sqrt_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
        anti: bool,
        inverse: bool,
    ) -> Result<()>;

    /// Fidelity-style distance `1 − |⟨self|other⟩|²`
    fn sum_sqr_diff(&self, other: &dyn StateEngine) -> Result<f64>;

    /// Refresh the engine's cached norm after a lossy operation
    fn update_running_norm(&mut self);

    /// Rescale to unit norm if the cached norm has drifted
    fn normalize_state(&mut self);

    /// Native single-qubit separability test; engines without one decline
    ///
    /// Stabilizer-family engines override this with an exact test.
    fn try_separate(&mut self, _index: usize) -> bool {
        false
    }

    /// Whether this register is stabilizer-tracked
    fn is_clifford(&self) -> bool {
        false
    }

    /// Whether this register is a binary decision tree
    fn is_binary_decision_tree(&self) -> bool {
        false
    }

    /// Join all outstanding asynchronous work for this register
    fn finish(&mut self) {}
}

/// Allocate a backing register of the given kind
///
/// # Arguments
/// * `kind` - engine implementation to allocate
/// * `num_qubits` - register width
/// * `perm` - initial classical state
/// * `seed` - measurement RNG seed; `None` seeds from entropy
///
/// # Errors
/// Returns [`EngineError::AllocationFailure`] if the register cannot be
/// allocated.
pub fn make_engine(
    kind: EngineKind,
    num_qubits: usize,
    perm: u64,
    seed: Option<u64>,
) -> Result<Box<dyn StateEngine>> {
    match kind {
        EngineKind::DenseCpu => Ok(Box::new(crate::dense::DenseEngine::new(
            num_qubits, perm, seed,
        )?)),
    }
}

pub(crate) fn check_index(index: usize, num_qubits: usize) -> Result<()> {
    if index >= num_qubits {
        return Err(EngineError::InvalidQubitIndex { index, num_qubits });
    }
    Ok(())
}
