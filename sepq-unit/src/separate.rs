//! The Separator: detecting and detaching near-product-state qubits
//!
//! The single-qubit probe samples the reduced Bloch vector by reading
//! `prob_base` in three frames — rotating the qubit's *logical* frame
//! between probes, never materializing anything — and accepts separability
//! only when the vector length lands inside the documented policy boundary
//! (see [`DEFAULT_SEPARABILITY_THRESHOLD`]). Acceptance commits through a
//! verified engine-side rotation and [`separate_bit`]; anything
//! inconclusive is undone and reported inseparable.
//!
//! [`DEFAULT_SEPARABILITY_THRESHOLD`]: crate::config::DEFAULT_SEPARABILITY_THRESHOLD
//! [`separate_bit`]: QubitRegister::separate_bit

use crate::buffers::is_norm_zero;
use crate::error::Result;
use crate::register::{QubitRegister, I, ONE};
use crate::shard::Pauli;
use num_complex::Complex64;
use sepq_engine::NORM_EPSILON;

/// Rotation taking `|0⟩` to the Bloch direction `(azimuth, inclination)`
fn ai_matrix(azimuth: f64, inclination: f64) -> [Complex64; 4] {
    let cos_i = (inclination / 2.0).cos();
    let sin_i = (inclination / 2.0).sin();
    let exp_a = Complex64::new(azimuth.cos(), azimuth.sin());
    let exp_neg_a = Complex64::new(azimuth.cos(), -azimuth.sin());
    [
        Complex64::new(cos_i, 0.0),
        -exp_neg_a * sin_i,
        exp_a * sin_i,
        Complex64::new(cos_i, 0.0),
    ]
}

/// Inverse of [`ai_matrix`]
fn iai_matrix(azimuth: f64, inclination: f64) -> [Complex64; 4] {
    let cos_i = (inclination / 2.0).cos();
    let sin_i = (inclination / 2.0).sin();
    let exp_a = Complex64::new(azimuth.cos(), azimuth.sin());
    let exp_neg_a = Complex64::new(azimuth.cos(), -azimuth.sin());
    [
        Complex64::new(cos_i, 0.0),
        exp_neg_a * sin_i,
        -exp_a * sin_i,
        Complex64::new(cos_i, 0.0),
    ]
}

impl QubitRegister {
    /// Probability that `qubit` reads 1 in its current frame, refreshing
    /// the amplitude cache
    ///
    /// A shard left alone in a 1-qubit unit is reabsorbed into its cached
    /// pair here, sniffing X/Y eigenstates so a `|+⟩`-like state caches
    /// cleanly instead of as an untrusted Z pair. A dirty multi-qubit
    /// shard pays one engine probability read; eigenstate results detach
    /// the qubit on the spot.
    pub(crate) fn prob_base(&mut self, qubit: usize) -> Result<f64> {
        let eps = self.config.separability_threshold;

        if let Some(id) = self.shards[qubit].unit {
            if self.engine_ref(id).qubit_count() == 1 {
                self.revert_basis_1qb(qubit)?;
                let amps = self.engine_ref(id).get_quantum_state();
                let (mut amp0, mut amp1) = (amps[0], amps[1]);
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

                self.units.remove(&id);
                self.stats.separations += 1;
                let shard = &mut self.shards[qubit];
                shard.pauli_basis = basis;
                shard.amp0 = amp0;
                shard.amp1 = amp1;
                shard.is_prob_dirty = false;
                shard.is_phase_dirty = false;
                shard.unit = None;
                shard.mapped = 0;
                shard.clamp_amps(NORM_EPSILON);
                return Ok(shard.amp1.norm_sqr());
            }
        }

        if !self.shards[qubit].is_prob_dirty {
            return Ok(self.shards[qubit].prob().clamp(0.0, 1.0));
        }

        let (id, mapped) = {
            let shard = &mut self.shards[qubit];
            shard.is_prob_dirty = false;
            (
                shard.unit.expect("a dirty shard always owns a unit"),
                shard.mapped,
            )
        };
        let prob = self.engine_ref(id).prob(mapped)?;
        {
            let shard = &mut self.shards[qubit];
            shard.amp1 = Complex64::new(prob.sqrt(), 0.0);
            shard.amp0 = Complex64::new((1.0 - prob).sqrt(), 0.0);
        }

        if is_norm_zero(self.shards[qubit].amp1) {
            self.separate_bit(false, qubit)?;
        } else if is_norm_zero(self.shards[qubit].amp0) {
            self.separate_bit(true, qubit)?;
        }

        Ok(prob)
    }

    /// Hard commit: detach `qubit` from its unit with the known classical
    /// outcome `value`
    ///
    /// The shard's cache becomes the classical pair, the unit shrinks by
    /// one qubit (renormalizing if floating-point drift warrants), every
    /// sibling slot above the removed one shifts down, and a unit left
    /// with a single qubit has that qubit reabsorbed too.
    pub(crate) fn separate_bit(&mut self, value: bool, qubit: usize) -> Result<bool> {
        let unit = self.shards[qubit].unit;
        let mapped = self.shards[qubit].mapped;

        if let Some(id) = unit {
            let engine = self.engine_mut(id);
            if engine.is_clifford() && !engine.try_separate(mapped) {
                return Ok(false);
            }
        }

        {
            // The eigenstate pair is expressed in the shard's current
            // frame; the frame label survives the cut.
            let shard = &mut self.shards[qubit];
            shard.unit = None;
            shard.mapped = 0;
            shard.is_prob_dirty = false;
            shard.is_phase_dirty = false;
            shard.amp0 = if value { Complex64::default() } else { ONE };
            shard.amp1 = if value { ONE } else { Complex64::default() };
        }

        let Some(id) = unit else {
            return Ok(true);
        };

        if self.engine_ref(id).qubit_count() == 1 {
            self.units.remove(&id);
            self.stats.separations += 1;
            return Ok(true);
        }

        let prob = self.engine_ref(id).prob(mapped)?;
        {
            let engine = self.engine_mut(id);
            engine.dispose(mapped, 1, Some(u64::from(value)))?;

            // Far from an eigenstate, the projection can have eaten real
            // norm; spend one renormalization pass on it.
            let drift = 0.5 - prob;
            if !engine.is_binary_decision_tree() && (0.5 - drift.abs()) > NORM_EPSILON {
                engine.update_running_norm();
                engine.normalize_state();
            }
        }
        self.stats.separations += 1;

        for shard in self.shards.iter_mut() {
            if shard.unit == Some(id) && shard.mapped > mapped {
                shard.mapped -= 1;
            }
        }

        if self.engine_ref(id).qubit_count() != 1 {
            return Ok(true);
        }

        // One sibling left alone in the unit: reabsorb it as well.
        let partner = (0..self.qubit_count()).find(|&i| self.shards[i].unit == Some(id));
        if let Some(partner) = partner {
            self.prob_base(partner)?;
        }
        Ok(true)
    }

    fn try_separate_clifford(&mut self, qubit: usize) -> Result<bool> {
        let id = self.shards[qubit]
            .unit
            .expect("clifford separation requires a unit");
        let mapped = self.shards[qubit].mapped;
        if !self.engine_mut(id).try_separate(mapped) {
            return Ok(false);
        }

        // The stabilizer engine certified the cut; commit it.
        let sep = self.alloc_unit(1, 0)?;
        let mut sep_engine = self
            .units
            .remove(&sep)
            .expect("freshly allocated unit is in the arena");
        self.engine_mut(id).decompose(mapped, sep_engine.as_mut())?;
        self.units.insert(sep, sep_engine);

        for i in 0..self.qubit_count() {
            if self.shards[i].unit == Some(id) && self.shards[i].mapped > mapped {
                self.shards[i].mapped -= 1;
            }
        }
        let shard = &mut self.shards[qubit];
        shard.mapped = 0;
        shard.unit = Some(sep);
        shard.make_dirty();

        self.prob_base(qubit)?;
        Ok(true)
    }

    /// Attempt to detach `qubit` from its unit
    ///
    /// Returns true when the qubit ends up (or already was) separable.
    /// An already-separable qubit is a no-op success with zero state
    /// mutation.
    pub fn try_separate(&mut self, qubit: usize) -> Result<bool> {
        self.check_index(qubit)?;

        if self.shard_unit_qubits(qubit) == 1 {
            if self.shards[qubit].unit.is_some() {
                self.prob_base(qubit)?;
            }
            return Ok(true);
        }

        if let Some(id) = self.shards[qubit].unit {
            if self.engine_ref(id).is_clifford() {
                return self.try_separate_clifford(qubit);
            }
        }

        // Sample the reduced Bloch vector, one frame per probe.
        let (mut x, mut y, mut z) = (0.0f64, 0.0f64, 0.0f64);
        for probe in 0..3 {
            let expectation = 2.0 * (0.5 - self.prob_base(qubit)?);

            if self.shards[qubit].unit.is_none() {
                // An eigenstate probe already detached it.
                return Ok(true);
            }

            match self.shards[qubit].pauli_basis {
                Pauli::Z => z = expectation,
                Pauli::X => x = expectation,
                Pauli::Y => y = expectation,
            }

            if probe >= 2 {
                continue;
            }
            match self.shards[qubit].pauli_basis {
                Pauli::Z => self.convert_z_to_x(qubit)?,
                Pauli::X => self.convert_x_to_y(qubit)?,
                Pauli::Y => self.convert_y_to_z(qubit)?,
            }
        }

        let threshold = self.config.separability_threshold;
        let r = (x * x + y * y + z * z).sqrt();
        // Policy boundary, inclusive: a pure reduced state has r = 1.
        if (1.0 - r) > threshold || r > 1.0 + threshold {
            return Ok(false);
        }

        // Express the vector in the physical frame of the current basis.
        match self.shards[qubit].pauli_basis {
            Pauli::Z => {}
            Pauli::X => {
                self.revert_basis_1qb(qubit)?;
            }
            Pauli::Y => {
                let (nx, ny, nz) = (z, x, y);
                x = nx;
                y = ny;
                z = nz;
            }
        }

        let inclination = (x * x + y * y).sqrt().atan2(z);
        let azimuth = y.atan2(x);

        let id = self.shards[qubit]
            .unit
            .expect("probe loop verified the unit");
        let mapped = self.shards[qubit].mapped;

        // Rotate the qubit onto its eigenbasis and verify before cutting.
        self.engine_mut(id)
            .mtrx(&iai_matrix(azimuth, inclination), mapped)?;
        let residual = self.engine_ref(id).prob(mapped)?;
        if residual > threshold {
            self.engine_mut(id)
                .mtrx(&ai_matrix(azimuth, inclination), mapped)?;
            return Ok(false);
        }

        self.separate_bit(false, qubit)?;

        // Restore the logical state on the now-classical cached pair.
        let m = ai_matrix(azimuth, inclination);
        let shard = &mut self.shards[qubit];
        let y0 = shard.amp0;
        shard.amp0 = m[0] * y0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * y0 + m[3] * shard.amp1;
        shard.clamp_amps(NORM_EPSILON);

        Ok(true)
    }

    /// Attempt to certify that two qubits are separable from each other
    ///
    /// Each is tried individually first. If both remain in one shared
    /// unit, a reversible three-frame disentangling probe (conjugation by
    /// CNOT, controlled-Y-phase, and controlled-inversion/CZ relations)
    /// gives the reactive separator three chances to find a cut; an
    /// inconclusive probe undoes itself and conservatively reports false —
    /// it never reports separable incorrectly.
    pub fn try_separate_pair(&mut self, qubit1: usize, qubit2: usize) -> Result<bool> {
        self.check_index(qubit1)?;
        self.check_index(qubit2)?;

        // A deferred relation between the pair is entanglement the buffer
        // graph is carrying on the units' behalf; product shards joined by
        // a pending gate are not a product state.
        if self.pending_edge(qubit1, qubit2) {
            return Ok(false);
        }

        let sep1 = self.try_separate(qubit1)?;
        let sep2 = self.try_separate(qubit2)?;

        if sep1 || sep2 || !self.same_unit(qubit1, qubit2) {
            return Ok((sep1 && sep2) && !self.pending_edge(qubit1, qubit2));
        }

        if self.freeze_basis_2qb {
            return Ok(false);
        }

        let was_reactive = self.config.reactive_separate;
        self.config.reactive_separate = true;

        let both_free = |reg: &Self| -> bool {
            reg.shards[qubit1].unit.is_none() && reg.shards[qubit2].unit.is_none()
        };
        let either_free = |reg: &Self| -> bool {
            reg.shards[qubit1].unit.is_none() || reg.shards[qubit2].unit.is_none()
        };

        // Kick the one possible bit of entanglement entropy upward, one
        // frame at a time; the sequence composes to the identity, and any
        // undo that lands back in the buffer graph keeps the pair
        // reported inseparable.
        self.mc_invert(&[qubit1], ONE, ONE, qubit2)?; // CNOT
        if either_free(self) {
            self.mc_invert(&[qubit1], ONE, ONE, qubit2)?;
            self.config.reactive_separate = was_reactive;
            return Ok(both_free(self) && !self.pending_edge(qubit1, qubit2));
        }

        self.mc_phase(&[qubit1], -I, I, qubit2)?;
        if either_free(self) {
            self.mc_invert(&[qubit1], -I, I, qubit2)?; // CY undoes CNOT·CPhase
            self.config.reactive_separate = was_reactive;
            return Ok(both_free(self) && !self.pending_edge(qubit1, qubit2));
        }

        self.mc_invert(&[qubit1], -I, -I, qubit2)?;
        self.mc_phase(&[qubit1], ONE, -ONE, qubit2)?; // CZ closes the loop
        self.config.reactive_separate = was_reactive;
        Ok(both_free(self) && !self.pending_edge(qubit1, qubit2))
    }

    /// Any deferred relation on the edge between two qubits
    fn pending_edge(&self, qubit1: usize, qubit2: usize) -> bool {
        let shard = &self.shards[qubit1];
        shard.targets_of.contains_key(&qubit2)
            || shard.controls_of.contains_key(&qubit2)
            || shard.anti_targets_of.contains_key(&qubit2)
            || shard.anti_controls_of.contains_key(&qubit2)
    }
}
