//! Register-level composition, detachment, cloning, and global state
//! access
//!
//! `compose` is pure bookkeeping: another register's shards splice in and
//! its engines move arenas, with no backing-engine interaction until a
//! gate actually couples the two sides. `detach` is the inverse: after
//! flushing the departing range's buffers it calls each distinct unit's
//! native decompose or dispose exactly once, fixes every survivor's slot,
//! and refuses to leave a trivial one-qubit unit behind.

use crate::config::RegisterConfig;
use crate::error::{RegisterError, Result};
use crate::map::ShardMap;
use crate::register::{QubitRegister, ONE};
use crate::shard::{Pauli, Shard, UnitId};
use ahash::AHashMap;
use num_complex::Complex64;
use sepq_engine::NORM_EPSILON;

const I: Complex64 = Complex64::new(0.0, 1.0);

impl QubitRegister {
    /// Append another register's qubits to this one
    ///
    /// Returns the logical index at which the appended qubits start.
    pub fn compose(&mut self, other: &mut QubitRegister) -> Result<usize> {
        let start = self.qubit_count();
        self.compose_at(other, start)
    }

    /// Splice another register's qubits in at `start`
    ///
    /// The other register is deep-copied; no aliasing results, and no
    /// engine work happens beyond the copy itself.
    pub fn compose_at(&mut self, other: &mut QubitRegister, start: usize) -> Result<usize> {
        if start > self.qubit_count() {
            return Err(RegisterError::InvalidQubitIndex {
                index: start,
                num_qubits: self.qubit_count(),
            });
        }

        let clone = other.try_clone()?;
        let QubitRegister {
            shards: clone_shards,
            units: clone_units,
            ..
        } = clone;

        let mut id_map: AHashMap<UnitId, UnitId> = AHashMap::with_capacity(clone_units.len());
        for (old_id, engine) in clone_units {
            let new_id = UnitId(self.next_unit);
            self.next_unit += 1;
            self.units.insert(new_id, engine);
            id_map.insert(old_id, new_id);
        }

        let mut incoming: Vec<Shard> = clone_shards.into_shards();
        for shard in incoming.iter_mut() {
            if let Some(old_id) = shard.unit {
                shard.unit = Some(id_map[&old_id]);
            }
        }

        self.shards.splice(start, incoming);
        Ok(start)
    }

    /// Remove `length` qubits starting at `start`, preserving their state
    /// as a new independent register
    pub fn decompose(&mut self, start: usize, length: usize) -> Result<QubitRegister> {
        let mut dest = QubitRegister::new(length, 0, self.config.clone());
        self.detach(start, length, Some(&mut dest))?;
        Ok(dest)
    }

    /// Remove `length` qubits starting at `start`, discarding their state
    pub fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.detach(start, length, None)
    }

    /// Shared removal path behind `decompose` and `dispose`
    pub(crate) fn detach(
        &mut self,
        start: usize,
        length: usize,
        dest: Option<&mut QubitRegister>,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        if start + length > self.qubit_count() {
            return Err(RegisterError::InvalidQubitIndex {
                index: start + length - 1,
                num_qubits: self.qubit_count(),
            });
        }
        if let Some(dest) = dest.as_deref() {
            if dest.qubit_count() != length {
                return Err(RegisterError::SizeMismatch {
                    expected: length,
                    actual: dest.qubit_count(),
                });
            }
        }
        let want_dest = dest.is_some();

        // Buffers crossing the cut must become real before the cut.
        for qubit in start..start + length {
            self.revert_basis_2qb_full(qubit)?;
        }

        // How many departing qubits each unit holds.
        let mut subunits: AHashMap<UnitId, usize> = AHashMap::new();
        for qubit in start..start + length {
            if let Some(id) = self.shards[qubit].unit {
                *subunits.entry(id).or_insert(0) += 1;
            }
        }

        // Units may hold bystander qubits interleaved at random; make each
        // unit's departing block physically contiguous.
        if length > 1 {
            let ids: Vec<UnitId> = subunits.keys().copied().collect();
            for id in ids {
                self.order_contiguous(id)?;
            }
        }

        // One decompose/dispose per distinct unit; the first departing
        // shard of each unit does the work and records the rebase for its
        // siblings.
        struct Split {
            base: usize,
            sub_len: usize,
            new_unit: Option<UnitId>,
        }
        let mut splits: AHashMap<UnitId, Split> = AHashMap::new();

        for qubit in start..start + length {
            let Some(old_id) = self.shards[qubit].unit else {
                continue;
            };

            if let Some(split) = splits.get(&old_id) {
                if let Some(new_id) = split.new_unit {
                    let base = split.base;
                    self.shards[qubit].unit = Some(new_id);
                    self.shards[qubit].mapped -= base;
                }
                continue;
            }

            let sub_len = subunits[&old_id];
            let orig_len = self.engine_ref(old_id).qubit_count();
            let base = self.shards[qubit].mapped;
            let mut new_unit = None;

            if sub_len != orig_len {
                if want_dest {
                    let new_id = self.alloc_unit(sub_len, 0)?;
                    let mut new_engine = self
                        .units
                        .remove(&new_id)
                        .expect("freshly allocated unit is in the arena");
                    self.engine_mut(old_id).decompose(base, new_engine.as_mut())?;
                    self.units.insert(new_id, new_engine);
                    self.shards[qubit].unit = Some(new_id);
                    self.shards[qubit].mapped = 0;
                    new_unit = Some(new_id);

                    if sub_len == 1 {
                        // Don't keep a trivial one-qubit engine alive.
                        self.absorb_lone_qubit(qubit, new_id);
                        new_unit = None;
                    }
                } else {
                    self.engine_mut(old_id).dispose(base, sub_len, None)?;
                }

                if sub_len == orig_len - 1 {
                    // Exactly one bystander is left in the old unit; pull
                    // its amplitudes out rather than keep the unit.
                    let survivor_slot = if base == 0 { sub_len } else { 0 };
                    let survivor = (0..self.qubit_count()).find(|&i| {
                        !(start..start + length).contains(&i)
                            && self.shards[i].unit == Some(old_id)
                            && self.shards[i].mapped == survivor_slot
                    });
                    if let Some(survivor) = survivor {
                        self.absorb_lone_qubit(survivor, old_id);
                    }
                }
            } else if !want_dest {
                // The whole unit departs and nobody wants its state.
                self.units.remove(&old_id);
            }

            splits.insert(
                old_id,
                Split {
                    base,
                    sub_len,
                    new_unit,
                },
            );
        }

        // Survivors above a removed block shift down within their unit.
        for shard in self.shards.iter_mut() {
            if let Some(id) = shard.unit {
                if let Some(split) = splits.get(&id) {
                    if shard.mapped >= split.base + split.sub_len {
                        shard.mapped -= split.sub_len;
                    }
                }
            }
        }

        let removed = self.shards.erase(start, length);

        if let Some(dest) = dest {
            dest.units.clear();
            let mut id_map: AHashMap<UnitId, UnitId> = AHashMap::new();
            let mut dest_shards = removed;
            for shard in dest_shards.iter_mut() {
                if let Some(old_id) = shard.unit {
                    let new_id = match id_map.get(&old_id) {
                        Some(&id) => id,
                        None => {
                            let engine = self
                                .units
                                .remove(&old_id)
                                .expect("departing unit is still in the arena");
                            let id = UnitId(dest.next_unit);
                            dest.next_unit += 1;
                            dest.units.insert(id, engine);
                            id_map.insert(old_id, id);
                            id
                        }
                    };
                    shard.unit = Some(new_id);
                }
            }
            dest.shards = ShardMap::from_shards(dest_shards);
        }

        Ok(())
    }

    /// Collapse a one-qubit unit into its shard's cached amplitude pair
    fn absorb_lone_qubit(&mut self, qubit: usize, unit: UnitId) {
        let amps = self.engine_ref(unit).get_quantum_state();
        self.units.remove(&unit);
        let shard = &mut self.shards[qubit];
        shard.amp0 = amps[0];
        shard.amp1 = amps[1];
        shard.is_prob_dirty = false;
        shard.is_phase_dirty = false;
        shard.unit = None;
        shard.mapped = 0;
        shard.clamp_amps(NORM_EPSILON);
    }

    /// Fully independent deep copy, including backing units
    pub fn try_clone(&mut self) -> Result<QubitRegister> {
        for qubit in 0..self.qubit_count() {
            self.revert_basis_2qb_full(qubit)?;
        }

        let mut copy = QubitRegister::new(self.qubit_count(), 0, self.config.clone());
        copy.stats = self.stats;

        let mut dupes: AHashMap<UnitId, UnitId> = AHashMap::new();
        let mut shards_copy = self.shards.clone();
        for shard in shards_copy.iter_mut() {
            if let Some(old_id) = shard.unit {
                let new_id = match dupes.get(&old_id) {
                    Some(&id) => id,
                    None => {
                        let engine = self.engine_ref(old_id).clone_boxed();
                        let id = UnitId(copy.next_unit);
                        copy.next_unit += 1;
                        copy.units.insert(id, engine);
                        dupes.insert(old_id, id);
                        id
                    }
                };
                shard.unit = Some(new_id);
            }
        }
        copy.shards = shards_copy;
        Ok(copy)
    }

    /// Fidelity-style distance `1 − |⟨self|other⟩|²` between two registers
    pub fn sum_sqr_diff(&mut self, other: &mut QubitRegister) -> Result<f64> {
        if self.qubit_count() != other.qubit_count() {
            // Unequal widths cannot be approximately equal.
            return Ok(1.0);
        }

        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0)?;
            other.revert_basis_1qb(0)?;
            let a = self.single_qubit_amps(0);
            let b = other.single_qubit_amps(0);
            let overlap = a.0.conj() * b.0 + a.1.conj() * b.1;
            return Ok((1.0 - overlap.norm_sqr()).clamp(0.0, 1.0));
        }

        // Two cached classical permutations compare without any engine.
        if self.check_bits_permutation(0, self.qubit_count())?
            && other.check_bits_permutation(0, other.qubit_count())?
        {
            let same = self.cached_permutation(0, self.qubit_count())
                == other.cached_permutation(0, other.qubit_count());
            return Ok(if same { 0.0 } else { 1.0 });
        }

        let mine = self.get_quantum_state()?;
        let theirs = other.get_quantum_state()?;
        let overlap: Complex64 = mine
            .iter()
            .zip(theirs.iter())
            .map(|(a, b)| a.conj() * b)
            .sum();
        Ok((1.0 - overlap.norm_sqr()).clamp(0.0, 1.0))
    }

    fn single_qubit_amps(&self, qubit: usize) -> (Complex64, Complex64) {
        match self.shards[qubit].unit {
            Some(id) => {
                let amps = self.engine_ref(id).get_quantum_state();
                (amps[0], amps[1])
            }
            None => (self.shards[qubit].amp0, self.shards[qubit].amp1),
        }
    }

    /// Reset the whole register to a classical permutation, collapsing and
    /// releasing every unit
    pub fn set_permutation(&mut self, perm: u64) {
        self.units.clear();
        let mut shards = ShardMap::new();
        for i in 0..self.qubit_count() {
            shards.push(Shard::new_classical((perm >> i) & 1 != 0));
        }
        self.shards = shards;
    }

    /// Overwrite the register with an arbitrary state vector
    ///
    /// A single qubit is sniffed for X/Y eigenstates so it can stay
    /// separable in a clean frame; anything wider materializes one unit.
    pub fn set_quantum_state(&mut self, amplitudes: &[Complex64]) -> Result<()> {
        let dimension = 1usize << self.qubit_count();
        if amplitudes.len() != dimension {
            return Err(RegisterError::SizeMismatch {
                expected: dimension,
                actual: amplitudes.len(),
            });
        }

        self.units.clear();

        if self.qubit_count() == 1 {
            let eps = self.config.separability_threshold;
            let (mut amp0, mut amp1) = (amplitudes[0], amplitudes[1]);
            let mut basis = Pauli::Z;
            if (amp0 - amp1).norm_sqr() <= eps {
                basis = Pauli::X;
                amp0 /= amp0.norm();
                amp1 = Complex64::default();
            } else if (amp0 + amp1).norm_sqr() <= eps {
                basis = Pauli::X;
                amp1 = amp0 / amp0.norm();
                amp0 = Complex64::default();
            } else if (I * amp0 - amp1).norm_sqr() <= eps {
                basis = Pauli::Y;
                amp0 /= amp0.norm();
                amp1 = Complex64::default();
            } else if (I * amp0 + amp1).norm_sqr() <= eps {
                basis = Pauli::Y;
                amp1 = amp0 / amp0.norm();
                amp0 = Complex64::default();
            }
            let shard = &mut self.shards[0];
            *shard = Shard::new_classical(false);
            shard.pauli_basis = basis;
            shard.amp0 = amp0;
            shard.amp1 = amp1;
            return Ok(());
        }

        let unit = self.alloc_unit(self.qubit_count(), 0)?;
        self.engine_mut(unit).set_quantum_state(amplitudes)?;
        let mut shards = ShardMap::new();
        for i in 0..self.qubit_count() {
            shards.push(Shard::new_mapped(unit, i));
        }
        self.shards = shards;
        Ok(())
    }

    /// Read the full state vector
    ///
    /// When the register is fragmented, assembly happens on a clone so the
    /// factored representation here survives the read.
    pub fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0)?;
            if self.shards[0].unit.is_none() {
                return Ok(vec![self.shards[0].amp0, self.shards[0].amp1]);
            }
        }

        if self.shard_unit_qubits(0) == self.qubit_count() {
            self.to_perm_basis_all()?;
            let unit = self.shards[0].unit.expect("full-width shard owns a unit");
            self.order_contiguous(unit)?;
            return Ok(self.engine_ref(unit).get_quantum_state());
        }

        let mut assembled = self.try_clone()?;
        let unit = assembled.entangle_all(false)?;
        Ok(assembled.engine_ref(unit).get_quantum_state())
    }

    /// Read all basis-state probabilities (cheaper flush than a full state
    /// read: phases stay buffered)
    pub fn get_probs(&mut self) -> Result<Vec<f64>> {
        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0)?;
            if self.shards[0].unit.is_none() {
                return Ok(vec![
                    self.shards[0].amp0.norm_sqr(),
                    self.shards[0].amp1.norm_sqr(),
                ]);
            }
        }

        if self.shard_unit_qubits(0) == self.qubit_count() {
            self.to_perm_basis_prob_all()?;
            let unit = self.shards[0].unit.expect("full-width shard owns a unit");
            self.order_contiguous(unit)?;
            let amps = self.engine_ref(unit).get_quantum_state();
            return Ok(amps.iter().map(|a| a.norm_sqr()).collect());
        }

        let mut assembled = self.try_clone()?;
        let unit = assembled.entangle_all(true)?;
        let amps = assembled.engine_ref(unit).get_quantum_state();
        Ok(amps.iter().map(|a| a.norm_sqr()).collect())
    }

    /// Amplitude of one basis state
    pub fn get_amplitude(&mut self, perm: u64) -> Result<Complex64> {
        self.get_amplitude_or_prob(perm, false)
    }

    pub(crate) fn get_amplitude_or_prob(&mut self, perm: u64, is_prob: bool) -> Result<Complex64> {
        let dimension = 1u64 << self.qubit_count();
        if perm >= dimension {
            return Err(RegisterError::SizeMismatch {
                expected: dimension as usize,
                actual: perm as usize,
            });
        }

        if is_prob {
            self.to_perm_basis_prob_all()?;
        } else {
            self.to_perm_basis_all()?;
        }

        let mut result = ONE;
        let mut unit_perms: AHashMap<UnitId, u64> = AHashMap::new();

        for i in 0..self.qubit_count() {
            let shard = &self.shards[i];
            match shard.unit {
                None => {
                    result *= if (perm >> i) & 1 != 0 {
                        shard.amp1
                    } else {
                        shard.amp0
                    };
                }
                Some(id) => {
                    let entry = unit_perms.entry(id).or_insert(0);
                    if (perm >> i) & 1 != 0 {
                        *entry |= 1 << shard.mapped;
                    }
                }
            }
        }

        for (id, unit_perm) in unit_perms {
            result *= self.engine_ref(id).get_amplitude(unit_perm)?;
            if result.norm_sqr() <= NORM_EPSILON {
                break;
            }
        }

        // Reading an amplitude of norm 1 certifies the whole register is
        // that permutation; collapse the representation to match.
        if self.shard_unit_qubits(0) > 1 && result.norm_sqr() >= 1.0 - NORM_EPSILON {
            self.set_permutation(perm);
        }

        Ok(result)
    }

    /// Whether every qubit in the range caches a Z-frame eigenstate
    pub(crate) fn check_bits_permutation(&mut self, start: usize, length: usize) -> Result<bool> {
        let eps = self.config.separability_threshold;
        for qubit in start..start + length {
            self.to_perm_basis_prob(qubit)?;
        }
        for qubit in start..start + length {
            if !self.shards[qubit].unsafe_cached_zero_or_one(eps) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read the classical value of a range known to be in eigenstates
    pub(crate) fn cached_permutation(&self, start: usize, length: usize) -> u64 {
        let mut result = 0u64;
        for (i, qubit) in (start..start + length).enumerate() {
            if self.shards[qubit].state_bit() {
                result |= 1 << i;
            }
        }
        result
    }
}

/// Build a register directly from a state vector
impl QubitRegister {
    /// Construct a register of `num_qubits` qubits holding `amplitudes`
    pub fn from_state(
        num_qubits: usize,
        amplitudes: &[Complex64],
        config: RegisterConfig,
    ) -> Result<Self> {
        let mut reg = Self::new(num_qubits, 0, config);
        reg.set_quantum_state(amplitudes)?;
        Ok(reg)
    }
}
