//! Per-qubit bookkeeping record
//!
//! A [`Shard`] is everything the register knows about one logical qubit:
//! which backing unit (if any) currently holds it, where inside that unit,
//! which Pauli frame its cached amplitude pair is expressed in, and the
//! deferred two-qubit relations it participates in. A shard with no unit is
//! *separable* and its amplitude pair is the complete truth about the qubit.

use ahash::AHashMap;
use num_complex::Complex64;

/// Opaque identity handle of a backing unit
///
/// Handles come from the register's arena; comparing two of them is the
/// "same owning unit" check, with no reference semantics involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) u64);

/// Pauli frame a shard's cached amplitudes are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pauli {
    Z,
    X,
    Y,
}

/// A deferred diagonal (`is_invert = false`) or antidiagonal
/// (`is_invert = true`) single-control two-qubit gate
///
/// For a normal control the pending gate on the target is
/// `diag(cmplx_diff, cmplx_same)` when diagonal and
/// `antidiag(cmplx_diff, cmplx_same)` when antidiagonal; for an
/// anti-control the two coefficients trade places. A relation multiplies
/// rather than stacks: combining two phase gates multiplies the
/// coefficients pointwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRelation {
    pub cmplx_diff: Complex64,
    pub cmplx_same: Complex64,
    pub is_invert: bool,
}

impl PhaseRelation {
    pub(crate) fn identity() -> Self {
        Self {
            cmplx_diff: Complex64::new(1.0, 0.0),
            cmplx_same: Complex64::new(1.0, 0.0),
            is_invert: false,
        }
    }

    /// Whether this relation is a no-op and can be dropped
    pub(crate) fn is_identity(&self, eps: f64) -> bool {
        !self.is_invert
            && (self.cmplx_diff - Complex64::new(1.0, 0.0)).norm_sqr() <= eps
            && (self.cmplx_same - Complex64::new(1.0, 0.0)).norm_sqr() <= eps
    }
}

/// Per-qubit record
///
/// The four partner maps are keyed by **partner logical index** and mirror
/// each other across the register: if qubit `c` holds `t` in `targets_of`,
/// then `t` holds `c` in `controls_of` with an identical relation (same for
/// the anti pair). Any asymmetry is a corruption bug; all mutation goes
/// through [`ShardMap`](crate::map::ShardMap) methods that touch both ends.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Owning backing unit, or `None` for a separable qubit
    pub unit: Option<UnitId>,

    /// Slot inside `unit`; meaningless when `unit` is `None`
    pub mapped: usize,

    /// Frame of the cached amplitude pair
    pub pauli_basis: Pauli,

    /// Cached amplitudes; the complete state when separable, a best
    /// estimate of the reduced state otherwise
    pub amp0: Complex64,
    pub amp1: Complex64,

    /// Cached `|amp1|²` can no longer be trusted
    pub is_prob_dirty: bool,

    /// Cached amplitude phases can no longer be trusted
    pub is_phase_dirty: bool,

    /// Partners that control this qubit (this qubit is the target)
    pub controls_of: AHashMap<usize, PhaseRelation>,

    /// Partners this qubit controls (this qubit is the control)
    pub targets_of: AHashMap<usize, PhaseRelation>,

    /// Anti-control variants of the two maps above
    pub anti_controls_of: AHashMap<usize, PhaseRelation>,
    pub anti_targets_of: AHashMap<usize, PhaseRelation>,
}

impl Shard {
    /// Fresh separable shard in the classical state `bit`
    pub fn new_classical(bit: bool) -> Self {
        Self {
            unit: None,
            mapped: 0,
            pauli_basis: Pauli::Z,
            amp0: if bit {
                Complex64::new(0.0, 0.0)
            } else {
                Complex64::new(1.0, 0.0)
            },
            amp1: if bit {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            },
            is_prob_dirty: false,
            is_phase_dirty: false,
            controls_of: AHashMap::new(),
            targets_of: AHashMap::new(),
            anti_controls_of: AHashMap::new(),
            anti_targets_of: AHashMap::new(),
        }
    }

    /// Fresh shard owned by `unit` at slot `mapped`, caches dirty
    pub fn new_mapped(unit: UnitId, mapped: usize) -> Self {
        Self {
            unit: Some(unit),
            mapped,
            pauli_basis: Pauli::Z,
            amp0: Complex64::new(0.0, 0.0),
            amp1: Complex64::new(0.0, 0.0),
            is_prob_dirty: true,
            is_phase_dirty: true,
            controls_of: AHashMap::new(),
            targets_of: AHashMap::new(),
            anti_controls_of: AHashMap::new(),
            anti_targets_of: AHashMap::new(),
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_prob_dirty || self.is_phase_dirty
    }

    #[inline]
    pub fn make_dirty(&mut self) {
        self.is_prob_dirty = true;
        self.is_phase_dirty = true;
    }

    /// Cached probability that the qubit reads 1 in its current frame
    #[inline]
    pub fn prob(&self) -> f64 {
        self.amp1.norm_sqr()
    }

    /// Whether the cached amplitudes put the qubit in the `|1⟩`-ish half
    #[inline]
    pub fn state_bit(&self) -> bool {
        self.amp0.norm_sqr() < 0.5
    }

    /// Any deferred two-qubit relation pending on this qubit
    #[inline]
    pub fn queued_phase(&self) -> bool {
        !self.controls_of.is_empty()
            || !self.targets_of.is_empty()
            || !self.anti_controls_of.is_empty()
            || !self.anti_targets_of.is_empty()
    }

    /// A buffered inversion is pending with this qubit as target
    pub fn is_invert_target(&self) -> bool {
        self.controls_of.values().any(|r| r.is_invert)
            || self.anti_controls_of.values().any(|r| r.is_invert)
    }

    /// A buffered inversion is pending with this qubit as control
    pub fn is_invert_control(&self) -> bool {
        self.targets_of.values().any(|r| r.is_invert)
            || self.anti_targets_of.values().any(|r| r.is_invert)
    }

    /// Trustworthy cached state in the given basis: clean and unburdened
    #[inline]
    pub fn cached_in(&self, basis: Pauli) -> bool {
        self.pauli_basis == basis && !self.is_dirty() && !self.queued_phase()
    }

    /// Clean cached `|0⟩` eigenstate (Z frame)
    pub fn cached_zero(&self, eps: f64) -> bool {
        self.cached_in(Pauli::Z) && self.amp1.norm_sqr() <= eps
    }

    /// Clean cached `|1⟩` eigenstate (Z frame)
    pub fn cached_one(&self, eps: f64) -> bool {
        self.cached_in(Pauli::Z) && self.amp0.norm_sqr() <= eps
    }

    /// Clean cached `|+⟩` eigenstate (X frame)
    pub fn cached_plus(&self, eps: f64) -> bool {
        self.cached_in(Pauli::X) && self.amp1.norm_sqr() <= eps
    }

    /// Z-frame eigenstate by probability alone; ignores pending buffers
    pub fn unsafe_cached_zero_or_one(&self, eps: f64) -> bool {
        !self.is_prob_dirty
            && self.pauli_basis == Pauli::Z
            && (self.amp0.norm_sqr() <= eps || self.amp1.norm_sqr() <= eps)
    }

    /// `|0⟩` by probability alone; ignores pending buffers
    pub fn unsafe_cached_zero(&self, eps: f64) -> bool {
        !self.is_prob_dirty && self.pauli_basis == Pauli::Z && self.amp1.norm_sqr() <= eps
    }

    /// `|1⟩` by probability alone; ignores pending buffers
    pub fn unsafe_cached_one(&self, eps: f64) -> bool {
        !self.is_prob_dirty && self.pauli_basis == Pauli::Z && self.amp0.norm_sqr() <= eps
    }

    /// Snap near-eigenstate amplitudes to exact eigenstates
    ///
    /// Returns true if the pair now sits on an eigenstate. Only meaningful
    /// when the probability cache is clean.
    pub fn clamp_amps(&mut self, eps: f64) -> bool {
        if self.is_prob_dirty {
            return false;
        }
        if self.amp1.norm_sqr() <= eps {
            let norm = self.amp0.norm();
            if norm > 0.0 {
                self.amp0 /= norm;
            }
            self.amp1 = Complex64::new(0.0, 0.0);
            true
        } else if self.amp0.norm_sqr() <= eps {
            let norm = self.amp1.norm();
            if norm > 0.0 {
                self.amp1 /= norm;
            }
            self.amp0 = Complex64::new(0.0, 0.0);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classical_shard_is_clean() {
        let shard = Shard::new_classical(true);
        assert!(shard.cached_one(1e-12));
        assert!(!shard.cached_zero(1e-12));
        assert!(!shard.queued_phase());
        assert!((shard.prob() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn clamp_snaps_near_eigenstates() {
        let mut shard = Shard::new_classical(false);
        shard.amp0 = Complex64::new(0.999_999_999, 0.0);
        shard.amp1 = Complex64::new(1e-9, 0.0);
        assert!(shard.clamp_amps(1e-12));
        assert_eq!(shard.amp1, Complex64::new(0.0, 0.0));
        assert!((shard.amp0.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn dirty_shard_refuses_clamp() {
        let mut shard = Shard::new_classical(false);
        shard.is_prob_dirty = true;
        assert!(!shard.clamp_amps(1e-12));
    }
}
