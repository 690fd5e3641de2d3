//! The qubit register: lazy entanglement management over backing engines
//!
//! A register starts with every qubit separable and spends the rest of its
//! life trying to keep things that way. Single-qubit gates act on cached
//! amplitude pairs or get re-expressed in whatever Pauli frame a shard
//! already sits in; `H` and `S` are frame relabels, not matrix
//! multiplications, whenever the bookkeeping allows it.

use crate::buffers::{is_norm_zero, is_same};
use crate::config::RegisterConfig;
use crate::error::{RegisterError, Result};
use crate::map::ShardMap;
use crate::shard::{Pauli, Shard, UnitId};
use crate::telemetry::RegisterStats;
use ahash::AHashMap;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sepq_engine::{make_engine, StateEngine};

pub(crate) const ONE: Complex64 = Complex64::new(1.0, 0.0);
pub(crate) const I: Complex64 = Complex64::new(0.0, 1.0);
const SQRT1_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Lazily-entangling register of logical qubits
///
/// The register owns its shard sequence and an arena of backing-engine
/// units; shards refer to units by opaque handle. One instance must not be
/// mutated from two threads; there are no internal locks.
pub struct QubitRegister {
    pub(crate) shards: ShardMap,
    pub(crate) units: AHashMap<UnitId, Box<dyn StateEngine>>,
    pub(crate) next_unit: u64,
    pub(crate) config: RegisterConfig,
    pub(crate) rng: StdRng,
    pub(crate) freeze_basis_2qb: bool,
    pub(crate) stats: RegisterStats,
}

impl QubitRegister {
    /// Create a register of `num_qubits` qubits in the classical state
    /// `init_perm`
    ///
    /// No backing engine is allocated here — or ever, until some operation
    /// genuinely requires one.
    pub fn new(num_qubits: usize, init_perm: u64, config: RegisterConfig) -> Self {
        let mut shards = ShardMap::new();
        for i in 0..num_qubits {
            shards.push(Shard::new_classical((init_perm >> i) & 1 != 0));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            shards,
            units: AHashMap::new(),
            next_unit: 0,
            config,
            rng,
            freeze_basis_2qb: false,
            stats: RegisterStats::default(),
        }
    }

    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.shards.len()
    }

    /// Instrumentation counters for this register's engine interactions
    #[inline]
    pub fn stats(&self) -> RegisterStats {
        self.stats
    }

    #[inline]
    pub fn config(&self) -> &RegisterConfig {
        &self.config
    }

    /// Toggle eager separation attempts after joint operations
    pub fn set_reactive_separate(&mut self, on: bool) {
        self.config.reactive_separate = on;
    }

    /// Join all outstanding asynchronous engine work
    pub fn finish(&mut self) {
        for engine in self.units.values_mut() {
            engine.finish();
        }
    }

    pub(crate) fn check_index(&self, qubit: usize) -> Result<()> {
        if qubit >= self.shards.len() {
            return Err(RegisterError::InvalidQubitIndex {
                index: qubit,
                num_qubits: self.shards.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn engine_mut(&mut self, id: UnitId) -> &mut Box<dyn StateEngine> {
        self.units
            .get_mut(&id)
            .expect("shard references a unit that is no longer in the arena")
    }

    pub(crate) fn engine_ref(&self, id: UnitId) -> &dyn StateEngine {
        self.units
            .get(&id)
            .map(|engine| engine.as_ref())
            .expect("shard references a unit that is no longer in the arena")
    }

    /// Width of the unit holding `qubit` (1 when separable)
    pub(crate) fn shard_unit_qubits(&self, qubit: usize) -> usize {
        match self.shards[qubit].unit {
            Some(id) => self.engine_ref(id).qubit_count(),
            None => 1,
        }
    }

    pub(crate) fn same_unit(&self, qubit1: usize, qubit2: usize) -> bool {
        match (self.shards[qubit1].unit, self.shards[qubit2].unit) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn alloc_unit(&mut self, length: usize, perm: u64) -> Result<UnitId> {
        let seed = self.rng.gen::<u64>();
        let engine = make_engine(self.config.engine, length, perm, Some(seed))?;
        let id = UnitId(self.next_unit);
        self.next_unit += 1;
        self.units.insert(id, engine);
        self.stats.engine_allocations += 1;
        Ok(id)
    }

    /// Give a separable shard a real 1-qubit backing register
    pub(crate) fn end_emulation(&mut self, qubit: usize) -> Result<()> {
        if self.shards[qubit].unit.is_some() {
            return Ok(());
        }
        let (amp0, amp1) = (self.shards[qubit].amp0, self.shards[qubit].amp1);
        let id = if is_norm_zero(amp1) {
            self.alloc_unit(1, 0)?
        } else if is_norm_zero(amp0) {
            self.alloc_unit(1, 1)?
        } else {
            let id = self.alloc_unit(1, 0)?;
            self.engine_mut(id).set_quantum_state(&[amp0, amp1])?;
            id
        };
        let shard = &mut self.shards[qubit];
        shard.unit = Some(id);
        shard.mapped = 0;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pauli frame conversions
    //
    // A shard in frame B caches the physical coordinates of its qubit; the
    // logical state is the frame map applied to those coordinates. Moving
    // from frame B to frame C applies the fixed matrix U_C† · U_B to the
    // physical qubit (engine and cache alike).
    // ---------------------------------------------------------------------

    fn apply_frame_matrix(&mut self, qubit: usize, m: &[Complex64; 4]) -> Result<()> {
        if let Some(id) = self.shards[qubit].unit {
            let mapped = self.shards[qubit].mapped;
            self.engine_mut(id).mtrx(m, mapped)?;
        }
        let shard = &mut self.shards[qubit];
        if shard.is_dirty() {
            // An unknown phase becomes an unknown probability under a
            // non-diagonal frame change; the cache is no estimate at all.
            shard.make_dirty();
            return Ok(());
        }
        let y0 = shard.amp0;
        shard.amp0 = m[0] * y0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * y0 + m[3] * shard.amp1;
        self.clamp_shard(qubit)
    }

    /// Toggle between the Z and X frames (Hadamard conjugation)
    pub(crate) fn convert_z_to_x(&mut self, qubit: usize) -> Result<()> {
        let shard = &mut self.shards[qubit];
        shard.pauli_basis = match shard.pauli_basis {
            Pauli::X => Pauli::Z,
            _ => Pauli::X,
        };
        let s = Complex64::new(SQRT1_2, 0.0);
        self.apply_frame_matrix(qubit, &[s, s, s, -s])
    }

    pub(crate) fn convert_x_to_y(&mut self, qubit: usize) -> Result<()> {
        self.shards[qubit].pauli_basis = Pauli::Y;
        let p = Complex64::new(0.5, 0.5);
        let m = Complex64::new(0.5, -0.5);
        self.apply_frame_matrix(qubit, &[m, p, p, m])
    }

    pub(crate) fn convert_y_to_z(&mut self, qubit: usize) -> Result<()> {
        self.shards[qubit].pauli_basis = Pauli::Z;
        let s = Complex64::new(SQRT1_2, 0.0);
        let si = Complex64::new(0.0, SQRT1_2);
        self.apply_frame_matrix(qubit, &[s, s, si, -si])
    }

    /// Leave the Y frame for X (used before `H`, which relabels Z↔X)
    pub(crate) fn revert_basis_y(&mut self, qubit: usize) -> Result<()> {
        if self.shards[qubit].pauli_basis != Pauli::Y {
            return Ok(());
        }
        self.shards[qubit].pauli_basis = Pauli::X;
        let p = Complex64::new(0.5, 0.5);
        let m = Complex64::new(0.5, -0.5);
        self.apply_frame_matrix(qubit, &[p, m, m, p])
    }

    /// Return a shard to the permutation (Z) frame
    pub(crate) fn revert_basis_1qb(&mut self, qubit: usize) -> Result<()> {
        match self.shards[qubit].pauli_basis {
            Pauli::Z => Ok(()),
            Pauli::X => self.convert_z_to_x(qubit),
            Pauli::Y => self.convert_y_to_z(qubit),
        }
    }

    // ---------------------------------------------------------------------
    // Physical-frame Pauli applications (frame label untouched)
    // ---------------------------------------------------------------------

    pub(crate) fn x_base(&mut self, qubit: usize) -> Result<()> {
        if let Some(id) = self.shards[qubit].unit {
            let mapped = self.shards[qubit].mapped;
            self.engine_mut(id).invert(ONE, ONE, mapped)?;
        }
        let shard = &mut self.shards[qubit];
        std::mem::swap(&mut shard.amp0, &mut shard.amp1);
        Ok(())
    }

    pub(crate) fn y_base(&mut self, qubit: usize) -> Result<()> {
        if let Some(id) = self.shards[qubit].unit {
            let mapped = self.shards[qubit].mapped;
            self.engine_mut(id).invert(-I, I, mapped)?;
        }
        let shard = &mut self.shards[qubit];
        let y0 = shard.amp0;
        shard.amp0 = -I * shard.amp1;
        shard.amp1 = I * y0;
        Ok(())
    }

    pub(crate) fn z_base(&mut self, qubit: usize) -> Result<()> {
        if let Some(id) = self.shards[qubit].unit {
            let mapped = self.shards[qubit].mapped;
            self.engine_mut(id).phase(ONE, -ONE, mapped)?;
        }
        let shard = &mut self.shards[qubit];
        shard.amp1 = -shard.amp1;
        Ok(())
    }

    /// Snap a clean cached pair onto an eigenstate and, if the shard still
    /// owns a unit, detach it on the spot
    pub(crate) fn clamp_shard(&mut self, qubit: usize) -> Result<()> {
        let snapped = {
            let shard = &mut self.shards[qubit];
            shard.clamp_amps(sepq_engine::NORM_EPSILON)
        };
        if !snapped || self.shards[qubit].unit.is_none() {
            return Ok(());
        }
        if is_norm_zero(self.shards[qubit].amp1) {
            self.separate_bit(false, qubit)?;
        } else if is_norm_zero(self.shards[qubit].amp0) {
            self.separate_bit(true, qubit)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Single-qubit gates
    // ---------------------------------------------------------------------

    /// Apply `diag(top_left, bottom_right)` to `target`
    pub fn phase(
        &mut self,
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;

        // Global phase is untracked, so only the relative phase matters.
        if is_norm_zero(top_left - bottom_right) {
            return Ok(());
        }
        if is_norm_zero(I * top_left - bottom_right) {
            return self.s(target);
        }
        if is_norm_zero(I * top_left + bottom_right) {
            return self.s_inv(target);
        }

        self.shards.commute_phase(target, top_left, bottom_right);

        if self.shards[target].pauli_basis == Pauli::Z {
            if let Some(id) = self.shards[target].unit {
                let mapped = self.shards[target].mapped;
                self.engine_mut(id).phase(top_left, bottom_right, mapped)?;
            }
            let shard = &mut self.shards[target];
            shard.amp0 *= top_left;
            shard.amp1 *= bottom_right;
            return Ok(());
        }

        let m = transform_phase(top_left, bottom_right);
        self.apply_transformed(target, &m)
    }

    /// Apply `[[0, top_right], [bottom_left, 0]]` to `target`
    pub fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;

        self.shards.flip_phase_anti(target);
        self.shards.commute_phase(target, top_right, bottom_left);

        if self.shards[target].pauli_basis == Pauli::Z {
            if let Some(id) = self.shards[target].unit {
                let mapped = self.shards[target].mapped;
                self.engine_mut(id).invert(top_right, bottom_left, mapped)?;
            }
            let shard = &mut self.shards[target];
            let new_amp1 = bottom_left * shard.amp0;
            shard.amp0 = top_right * shard.amp1;
            shard.amp1 = new_amp1;
            return Ok(());
        }

        let m = if self.shards[target].pauli_basis == Pauli::X {
            transform_x_invert(top_right, bottom_left)
        } else {
            transform_y_invert(top_right, bottom_left)
        };
        self.apply_transformed(target, &m)
    }

    /// Apply a general 2×2 matrix to `target`
    ///
    /// Diagonal, antidiagonal, and Hadamard-like shapes are peeled off
    /// first; only a genuinely general rotation pays for a buffer flush.
    pub fn mtrx(&mut self, m: &[Complex64; 4], target: usize) -> Result<()> {
        self.check_index(target)?;

        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            return self.phase(m[0], m[3], target);
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            return self.invert(m[1], m[2], target);
        }
        if is_same(m[0], m[1]) && is_same(m[0], m[2]) && is_same(m[0], -m[3]) {
            return self.h(target);
        }
        if is_same(m[0], m[1]) && is_same(m[0], -I * m[2]) && is_same(m[0], I * m[3]) {
            self.h(target)?;
            return self.s(target);
        }
        if is_same(m[0], I * m[1]) && is_same(m[0], m[2]) && is_same(m[0], -I * m[3]) {
            self.s_inv(target)?;
            return self.h(target);
        }

        self.revert_basis_2qb_full(target)?;

        let trns = match self.shards[target].pauli_basis {
            Pauli::Y => transform_y2x2(m),
            Pauli::X => transform_x2x2(m),
            Pauli::Z => *m,
        };
        self.apply_transformed(target, &trns)
    }

    fn apply_transformed(&mut self, target: usize, m: &[Complex64; 4]) -> Result<()> {
        if let Some(id) = self.shards[target].unit {
            let mapped = self.shards[target].mapped;
            self.engine_mut(id).mtrx(m, mapped)?;
        }
        let shard = &mut self.shards[target];
        if shard.is_dirty() {
            shard.is_prob_dirty |= !is_phase_or_invert(m);
        }
        let y0 = shard.amp0;
        shard.amp0 = m[0] * y0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * y0 + m[3] * shard.amp1;
        self.clamp_shard(target)
    }

    /// Hadamard as a frame relabel
    pub fn h(&mut self, target: usize) -> Result<()> {
        self.check_index(target)?;
        self.revert_basis_y(target)?;
        self.commute_h(target)?;
        let shard = &mut self.shards[target];
        shard.pauli_basis = match shard.pauli_basis {
            Pauli::Z => Pauli::X,
            _ => Pauli::Z,
        };
        Ok(())
    }

    /// Phase gate `S = diag(1, i)` as a frame relabel where possible
    pub fn s(&mut self, target: usize) -> Result<()> {
        self.check_index(target)?;
        self.shards.commute_phase(target, ONE, I);

        match self.shards[target].pauli_basis {
            Pauli::Y => {
                self.shards[target].pauli_basis = Pauli::X;
                self.x_base(target)
            }
            Pauli::X => {
                self.shards[target].pauli_basis = Pauli::Y;
                Ok(())
            }
            Pauli::Z => {
                if let Some(id) = self.shards[target].unit {
                    let mapped = self.shards[target].mapped;
                    self.engine_mut(id).phase(ONE, I, mapped)?;
                }
                let shard = &mut self.shards[target];
                shard.amp1 *= I;
                Ok(())
            }
        }
    }

    /// Inverse phase gate `S† = diag(1, −i)`
    pub fn s_inv(&mut self, target: usize) -> Result<()> {
        self.check_index(target)?;
        self.shards.commute_phase(target, ONE, -I);

        match self.shards[target].pauli_basis {
            Pauli::Y => {
                self.shards[target].pauli_basis = Pauli::X;
                Ok(())
            }
            Pauli::X => {
                self.shards[target].pauli_basis = Pauli::Y;
                self.x_base(target)
            }
            Pauli::Z => {
                if let Some(id) = self.shards[target].unit {
                    let mapped = self.shards[target].mapped;
                    self.engine_mut(id).phase(ONE, -I, mapped)?;
                }
                let shard = &mut self.shards[target];
                shard.amp1 *= -I;
                Ok(())
            }
        }
    }

    /// Pauli X
    pub fn x(&mut self, target: usize) -> Result<()> {
        self.invert(ONE, ONE, target)
    }

    /// Pauli Y
    pub fn y(&mut self, target: usize) -> Result<()> {
        self.invert(-I, I, target)
    }

    /// Pauli Z
    pub fn z(&mut self, target: usize) -> Result<()> {
        self.phase(ONE, -ONE, target)
    }
}

// -------------------------------------------------------------------------
// Fixed change-of-basis closed forms
// -------------------------------------------------------------------------

/// Re-express a general 2×2 matrix for a shard sitting in the X frame
pub(crate) fn transform_x2x2(m: &[Complex64; 4]) -> [Complex64; 4] {
    let half = 0.5;
    [
        half * (m[0] + m[1] + m[2] + m[3]),
        half * (m[0] - m[1] + m[2] - m[3]),
        half * (m[0] + m[1] - m[2] - m[3]),
        half * (m[0] - m[1] - m[2] + m[3]),
    ]
}

/// Re-express a general 2×2 matrix for a shard sitting in the Y frame
pub(crate) fn transform_y2x2(m: &[Complex64; 4]) -> [Complex64; 4] {
    let half = 0.5;
    [
        half * (m[0] + I * (m[1] - m[2]) + m[3]),
        half * (m[0] - I * (m[1] + m[2]) - m[3]),
        half * (m[0] + I * (m[1] + m[2]) - m[3]),
        half * (m[0] - I * (m[1] - m[2]) + m[3]),
    ]
}

/// Closed form for a diagonal gate in the X or Y frame
pub(crate) fn transform_phase(top_left: Complex64, bottom_right: Complex64) -> [Complex64; 4] {
    let half = 0.5;
    let sum = half * (top_left + bottom_right);
    let diff = half * (top_left - bottom_right);
    [sum, diff, diff, sum]
}

/// Closed form for an antidiagonal gate in the X frame
pub(crate) fn transform_x_invert(top_right: Complex64, bottom_left: Complex64) -> [Complex64; 4] {
    let half = 0.5;
    let a = half * (top_right + bottom_left);
    let b = half * (-top_right + bottom_left);
    [a, b, -b, -a]
}

/// Closed form for an antidiagonal gate in the Y frame
pub(crate) fn transform_y_invert(top_right: Complex64, bottom_left: Complex64) -> [Complex64; 4] {
    let half = 0.5;
    let a = I * half * (top_right - bottom_left);
    let b = I * half * (-top_right - bottom_left);
    [a, b, -b, -a]
}

/// Diagonal or antidiagonal shape test
pub(crate) fn is_phase_or_invert(m: &[Complex64; 4]) -> bool {
    (is_norm_zero(m[1]) && is_norm_zero(m[2])) || (is_norm_zero(m[0]) && is_norm_zero(m[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single() -> QubitRegister {
        QubitRegister::new(1, 0, RegisterConfig::seeded(11))
    }

    #[test]
    fn h_twice_restores_basis_and_amps() {
        let mut reg = single();
        reg.h(0).unwrap();
        assert_eq!(reg.shards[0].pauli_basis, Pauli::X);
        reg.h(0).unwrap();
        assert_eq!(reg.shards[0].pauli_basis, Pauli::Z);
        assert!(is_same(reg.shards[0].amp0, ONE));
        assert!(is_norm_zero(reg.shards[0].amp1));
        // Frame relabeling never touched an engine.
        assert_eq!(reg.stats().engine_allocations, 0);
    }

    #[test]
    fn z_twice_is_identity_without_entanglement() {
        let mut reg = single();
        reg.h(0).unwrap();
        reg.phase(ONE, -ONE, 0).unwrap();
        reg.phase(ONE, -ONE, 0).unwrap();
        reg.h(0).unwrap();
        assert!(is_same(reg.shards[0].amp0, ONE));
        assert_eq!(reg.stats().compositions, 0);
        assert_eq!(reg.stats().engine_allocations, 0);
    }

    #[test]
    fn s_four_times_is_identity() {
        let mut reg = single();
        reg.h(0).unwrap();
        for _ in 0..4 {
            reg.s(0).unwrap();
        }
        reg.h(0).unwrap();
        assert!(is_same(reg.shards[0].amp0, ONE));
        assert!(is_norm_zero(reg.shards[0].amp1));
    }

    #[test]
    fn x_flips_classical_bit() {
        let mut reg = single();
        reg.x(0).unwrap();
        assert!(is_norm_zero(reg.shards[0].amp0));
        assert!(is_same(reg.shards[0].amp1, ONE));
    }

    #[test]
    fn frame_round_trip_preserves_state() {
        let mut reg = single();
        reg.h(0).unwrap();
        reg.s(0).unwrap();
        // |y+> now; push it around every frame and back to Z.
        reg.revert_basis_1qb(0).unwrap();
        assert_eq!(reg.shards[0].pauli_basis, Pauli::Z);
        let p = reg.shards[0].prob();
        assert!((p - 0.5).abs() < 1e-12);
    }
}
