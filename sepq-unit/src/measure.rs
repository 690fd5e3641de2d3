//! Measurement and statistical sampling
//!
//! Collapse is where laziness pays out: a separable qubit measures against
//! its cached pair without any engine at all, and an entangled one
//! dirty-marks its unit siblings (the nonlocal correlation of collapse)
//! and then immediately tries to shrink the unit it just partially
//! determined.

use crate::error::Result;
use crate::register::QubitRegister;
use crate::revert::{RevertAnti, RevertControl, RevertExclusivity};
use crate::shard::UnitId;
use ahash::AHashMap;
use num_complex::Complex64;
use rand::Rng;
use sepq_engine::{EngineError, NORM_EPSILON};

impl QubitRegister {
    /// Probability that `qubit` reads 1, flushing just enough buffers for
    /// the answer to be true
    pub fn prob(&mut self, qubit: usize) -> Result<f64> {
        self.check_index(qubit)?;
        self.to_perm_basis_prob(qubit)?;
        self.prob_base(qubit)
    }

    /// Probability of one full basis state
    pub fn prob_all(&mut self, perm: u64) -> Result<f64> {
        let amp = self.get_amplitude_or_prob(perm, true)?;
        Ok(amp.norm_sqr().clamp(0.0, 1.0))
    }

    /// Measure `qubit` in the computational basis
    pub fn m(&mut self, qubit: usize) -> Result<bool> {
        self.force_m(qubit, false, false, true)
    }

    /// Measure `qubit`, optionally forcing the outcome, optionally without
    /// collapsing
    ///
    /// With `do_apply`, the qubit's buffers are flushed (inversions
    /// targeting it change its distribution; diagonal phases and buffers
    /// it controls commute with the collapse and stay), the outcome fixes
    /// the shard to a classical pair, every sibling in the unit goes
    /// dirty, and the unit is shrunk on the spot.
    pub fn force_m(
        &mut self,
        qubit: usize,
        result: bool,
        do_force: bool,
        do_apply: bool,
    ) -> Result<bool> {
        self.check_index(qubit)?;

        if do_apply {
            self.revert_basis_1qb(qubit)?;
            self.revert_basis_2qb(
                qubit,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
        } else {
            self.to_perm_basis_measure(qubit)?;
        }

        let outcome = match self.shards[qubit].unit {
            None => {
                let prob_one = self.shards[qubit].prob();
                if do_force {
                    let branch = if result { prob_one } else { 1.0 - prob_one };
                    if branch <= NORM_EPSILON {
                        return Err(EngineError::ImpossibleOutcome { index: qubit }.into());
                    }
                    result
                } else if prob_one >= 1.0 - NORM_EPSILON {
                    true
                } else if prob_one <= NORM_EPSILON {
                    false
                } else {
                    self.rng.gen::<f64>() < prob_one
                }
            }
            Some(id) => {
                // Always collapse the unit before any decompose/dispose.
                let mapped = self.shards[qubit].mapped;
                self.engine_mut(id).force_m(mapped, result, do_force, do_apply)?
            }
        };

        if !do_apply {
            return Ok(outcome);
        }

        {
            let shard = &mut self.shards[qubit];
            shard.is_prob_dirty = false;
            shard.is_phase_dirty = false;
            shard.amp0 = if outcome {
                Complex64::default()
            } else {
                Complex64::new(1.0, 0.0)
            };
            shard.amp1 = if outcome {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::default()
            };
        }

        if self.shard_unit_qubits(qubit) == 1 {
            if let Some(id) = self.shards[qubit].unit {
                self.units.remove(&id);
            }
            let shard = &mut self.shards[qubit];
            shard.unit = None;
            shard.mapped = 0;
        } else if self.shards[qubit].unit.is_some() {
            // The nonlocal correlation of wavefunction collapse: every
            // sibling's cache is now stale.
            let id = self.shards[qubit].unit;
            for i in 0..self.qubit_count() {
                if i != qubit && self.shards[i].unit == id {
                    self.shards[i].make_dirty();
                }
            }
            self.separate_bit(outcome, qubit)?;
        }

        if outcome {
            self.flush_1_eigenstate(qubit)?;
        } else {
            self.flush_0_eigenstate(qubit)?;
        }

        Ok(outcome)
    }

    /// Measure the whole register, returning the result permutation
    ///
    /// Diagonal phase buffers cannot move any outcome and are dumped;
    /// pending inversions keep their flip but lose their phases; qubits
    /// controlling pending inversions measure first (measurement commutes
    /// with a control). The register is then reset to the measured
    /// permutation, collapsing every unit.
    pub fn m_all(&mut self) -> Result<u64> {
        for qubit in 0..self.qubit_count() {
            self.revert_basis_1qb(qubit)?;
        }
        for qubit in 0..self.qubit_count() {
            self.shards.dump_phase_buffers(qubit);
            self.shards.clear_invert_phase(qubit);
        }
        for qubit in 0..self.qubit_count() {
            if self.shards[qubit].is_invert_control() {
                self.m(qubit)?;
            }
        }

        let mut result = 0u64;
        for qubit in 0..self.qubit_count() {
            if self.shards[qubit].unit.is_none() {
                let prob_one = self.shards[qubit].prob();
                let bit = prob_one >= 1.0 - NORM_EPSILON
                    || (prob_one > NORM_EPSILON && self.rng.gen::<f64>() < prob_one);
                if bit {
                    result |= 1 << qubit;
                }
            } else if self.m(qubit)? {
                result |= 1 << qubit;
            }
        }

        self.set_permutation(result);
        Ok(result)
    }

    /// Sample the joint distribution of the masked qubits `shots` times
    /// without collapsing anything
    ///
    /// Each independent unit's joint marginal is sampled once; results
    /// from different units are recombined by weighted random pairing, and
    /// still-separable qubits fold in classically — the tensor product of
    /// the factors is never materialized. Bit `i` of each returned key
    /// reports the qubit selected by `q_powers[i]`.
    pub fn multi_shot_measure_mask(
        &mut self,
        q_powers: &[u64],
        shots: u32,
    ) -> Result<AHashMap<u64, u32>> {
        if shots == 0 {
            return Ok(AHashMap::new());
        }

        self.to_perm_basis_prob_all()?;

        let mut unit_groups: AHashMap<UnitId, (Vec<u64>, Vec<u64>)> = AHashMap::new();
        let mut single_bits: Vec<(usize, u64)> = Vec::new();

        for (i, &power) in q_powers.iter().enumerate() {
            let qubit = power.trailing_zeros() as usize;
            self.check_index(qubit)?;
            let out_power = 1u64 << i;
            match self.shards[qubit].unit {
                None => single_bits.push((qubit, out_power)),
                Some(id) => {
                    let entry = unit_groups.entry(id).or_default();
                    entry.0.push(1u64 << self.shards[qubit].mapped);
                    entry.1.push(out_power);
                }
            }
        }

        let mut combined: AHashMap<u64, u32> = AHashMap::new();
        combined.insert(0, shots);

        for (unit, (sub_powers, out_powers)) in unit_groups {
            let unit_results = self
                .engine_mut(unit)
                .multi_shot_measure_mask(&sub_powers, shots)?;

            // Remap engine-local result bits onto caller mask bits.
            let mut top_level: AHashMap<u64, u32> = AHashMap::with_capacity(unit_results.len());
            for (key, count) in unit_results {
                let mut mask = 0u64;
                for (bit, &out) in out_powers.iter().enumerate() {
                    if (key >> bit) & 1 != 0 {
                        mask |= out;
                    }
                }
                top_level.insert(mask, count);
            }

            // All-zero distributions pass through unchanged.
            if top_level.len() == 1 && top_level.contains_key(&0) {
                continue;
            }
            if combined.len() == 1 && combined.contains_key(&0) {
                combined = top_level;
                continue;
            }

            // Keep the smaller map on the pick side.
            if combined.len() < top_level.len() {
                std::mem::swap(&mut combined, &mut top_level);
            }

            let mut merged: AHashMap<u64, u32> = AHashMap::new();

            // A single-key side needs no shuffle.
            if top_level.len() == 1 {
                let pick = *top_level
                    .keys()
                    .next()
                    .expect("non-empty distribution has a key");
                for (key, count) in combined {
                    merged.insert(key | pick, count);
                }
                combined = merged;
                continue;
            }

            // Weighted random pairing across the two factors.
            let mut pick_side: Vec<(u64, u32)> = top_level.into_iter().collect();
            let mut shots_left: i64 = i64::from(shots);
            for (key, count) in &combined {
                for _ in 0..*count {
                    let mut pick = (shots_left as f64 * self.rng.gen::<f64>()) as i64;
                    if pick >= shots_left {
                        pick = shots_left - 1;
                    }
                    shots_left -= 1;

                    let mut idx = 0usize;
                    let mut cumulative = i64::from(pick_side[0].1);
                    while pick >= cumulative {
                        idx += 1;
                        cumulative += i64::from(pick_side[idx].1);
                    }

                    *merged.entry(key | pick_side[idx].0).or_insert(0) += 1;
                    pick_side[idx].1 -= 1;
                    if pick_side[idx].1 == 0 {
                        pick_side.remove(idx);
                    }
                }
            }
            combined = merged;
        }

        // Fold in the separable qubits classically.
        for (qubit, out_power) in single_bits {
            let prob_one = self.shards[qubit].prob().clamp(0.0, 1.0);
            if prob_one <= NORM_EPSILON {
                continue;
            }

            let mut merged: AHashMap<u64, u32> = AHashMap::with_capacity(combined.len());
            if prob_one >= 1.0 - NORM_EPSILON {
                for (key, count) in combined {
                    merged.insert(key | out_power, count);
                }
            } else {
                for (key, count) in combined {
                    for _ in 0..count {
                        if self.rng.gen::<f64>() < prob_one {
                            *merged.entry(key | out_power).or_insert(0) += 1;
                        } else {
                            *merged.entry(key).or_insert(0) += 1;
                        }
                    }
                }
            }
            combined = merged;
        }

        Ok(combined)
    }
}
