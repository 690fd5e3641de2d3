//! Controlled gates and the swap family
//!
//! A single-control phase or inversion between qubits in different units is
//! never executed here: it lands in the phase buffer graph and waits.
//! Everything else funnels through `apply_either_controlled`, which flushes
//! the minimum set of buffers, entangles only the qubits the gate really
//! couples, and hands the backing engine a gate re-expressed in whatever
//! frame the target already occupies. Before any of that, `trim_controls`
//! strips away every control whose value is already classically known.

use crate::buffers::{is_norm_zero, is_one};
use crate::error::Result;
use crate::register::{
    transform_phase, transform_x2x2, transform_x_invert, transform_y2x2, transform_y_invert,
    QubitRegister, I, ONE,
};
use crate::revert::{RevertAnti, RevertControl, RevertExclusivity};
use crate::shard::Pauli;
use num_complex::Complex64;
use sepq_engine::StateEngine;
use smallvec::SmallVec;

type ControlVec = SmallVec<[usize; 4]>;

impl QubitRegister {
    /// Remove classically-resolved controls from a gate
    ///
    /// Returns `None` when some control can never fire (the whole gate is a
    /// no-op), or the surviving controls otherwise. Checks run cheapest
    /// first: cached eigenstates, then probability reads, then single-qubit
    /// frame reverts, and a full buffer flush only as the last resort.
    pub(crate) fn trim_controls(
        &mut self,
        controls: &[usize],
        anti: bool,
    ) -> Result<Option<ControlVec>> {
        if controls.is_empty() {
            return Ok(Some(ControlVec::new()));
        }
        for &c in controls {
            self.check_index(c)?;
        }
        let eps = self.config.separability_threshold;

        // No probability checks or buffer flushing.
        for &c in controls {
            let shard = &self.shards[c];
            if (anti && shard.cached_one(eps)) || (!anti && shard.cached_zero(eps)) {
                return Ok(None);
            }
        }

        // Probability checks, but no buffer flushing.
        for &c in controls {
            if self.shards[c].pauli_basis != Pauli::Z || self.shards[c].is_invert_target() {
                continue;
            }
            self.prob_base(c)?;
            if let Some(fired) = self.resolve_control(c, anti)? {
                if !fired {
                    return Ok(None);
                }
            }
        }

        // Single-qubit frame reverts only.
        for &c in controls {
            if self.shards[c].pauli_basis == Pauli::Z || self.shards[c].is_invert_target() {
                continue;
            }
            self.revert_basis_1qb(c)?;
            self.prob_base(c)?;
            if let Some(fired) = self.resolve_control(c, anti)? {
                if !fired {
                    return Ok(None);
                }
            }
        }

        // Full buffer flushing, last resort.
        let mut trimmed = ControlVec::new();
        for &c in controls {
            self.to_perm_basis_prob(c)?;
            self.prob_base(c)?;
            match self.resolve_control(c, anti)? {
                Some(false) => return Ok(None),
                Some(true) => {} // fires with certainty: no need to entangle it
                None => trimmed.push(c),
            }
        }
        Ok(Some(trimmed))
    }

    /// Classify a control with a fresh probability cache: `Some(fired)` if
    /// it is an eigenstate (flushing the matching eigenstate buffers),
    /// `None` if it is genuinely quantum
    fn resolve_control(&mut self, control: usize, anti: bool) -> Result<Option<bool>> {
        let eps = self.config.separability_threshold;
        if self.shards[control].amp1.norm_sqr() <= eps {
            self.flush_0_eigenstate(control)?;
            Ok(Some(anti))
        } else if self.shards[control].amp0.norm_sqr() <= eps {
            self.flush_1_eigenstate(control)?;
            Ok(Some(!anti))
        } else {
            Ok(None)
        }
    }

    /// Form the entangled representation and apply a controlled gate
    ///
    /// The target keeps its X or Y frame when the gate is diagonal (the
    /// closure receives the frame and compensates); controls only need
    /// their probabilities intact.
    pub(crate) fn apply_either_controlled(
        &mut self,
        controls: &ControlVec,
        targets: &[usize],
        is_phase: bool,
        f: impl FnOnce(&mut dyn StateEngine, &[usize], &[usize], Pauli) -> sepq_engine::Result<()>,
    ) -> Result<()> {
        for &c in controls.iter() {
            self.to_perm_basis_prob(c)?;
        }
        if targets.len() > 1 {
            for &t in targets {
                self.to_perm_basis(t)?;
            }
        } else if is_phase {
            self.revert_basis_2qb(
                targets[0],
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
        } else {
            self.revert_basis_2qb_full(targets[0])?;
        }

        let mut all_bits: Vec<usize> = controls.iter().chain(targets.iter()).copied().collect();
        all_bits.sort_unstable();
        let unit = self.entangle_in_current_basis(&all_bits)?;

        let mut mapped_controls: Vec<usize> = Vec::with_capacity(controls.len());
        for &c in controls.iter() {
            self.shards[c].is_phase_dirty = true;
            mapped_controls.push(self.shards[c].mapped);
        }
        let mut mapped_targets: Vec<usize> = Vec::with_capacity(targets.len());
        for &t in targets {
            let shard = &mut self.shards[t];
            shard.is_phase_dirty = true;
            shard.is_prob_dirty |= shard.pauli_basis != Pauli::Z || !is_phase;
            mapped_targets.push(shard.mapped);
        }
        let basis = self.shards[targets[0]].pauli_basis;

        f(
            self.engine_mut(unit).as_mut(),
            &mapped_controls,
            &mapped_targets,
            basis,
        )?;

        if !self.config.reactive_separate || self.freeze_basis_2qb {
            return Ok(());
        }

        if all_bits.len() == 2 {
            self.try_separate(all_bits[0])?;
            self.try_separate(all_bits[1])?;
            return Ok(());
        }
        for i in 0..all_bits.len() - 1 {
            for j in i + 1..all_bits.len() {
                self.try_separate_pair(all_bits[i], all_bits[j])?;
            }
        }
        Ok(())
    }

    fn ctrled_phase_invert(
        &mut self,
        controls: ControlVec,
        target: usize,
        anti: bool,
        is_invert: bool,
        top: Complex64,
        bottom: Complex64,
    ) -> Result<()> {
        self.apply_either_controlled(
            &controls,
            &[target],
            !is_invert,
            |engine, mapped_controls, mapped_targets, basis| {
                let m = match (basis, is_invert) {
                    (Pauli::Z, false) => [top, Complex64::default(), Complex64::default(), bottom],
                    (Pauli::Z, true) => [Complex64::default(), top, bottom, Complex64::default()],
                    (Pauli::X, false) | (Pauli::Y, false) => transform_phase(top, bottom),
                    (Pauli::X, true) => transform_x_invert(top, bottom),
                    (Pauli::Y, true) => transform_y_invert(top, bottom),
                };
                if anti {
                    engine.mac_mtrx(mapped_controls, &m, mapped_targets[0])
                } else {
                    engine.mc_mtrx(mapped_controls, &m, mapped_targets[0])
                }
            },
        )
    }

    /// Controlled phase `diag(top_left, bottom_right)` on `target`
    pub fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;
        if is_one(top_left) && is_one(bottom_right) {
            return Ok(());
        }
        let Some(ctrl) = self.trim_controls(controls, false)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.phase(top_left, bottom_right, target);
        }
        if ctrl.len() == 1 && is_norm_zero(top_left - bottom_right) {
            // diag(a, a) on the target is just diag(1, a) on the control.
            return self.phase(ONE, bottom_right, ctrl[0]);
        }

        if !self.freeze_basis_2qb && ctrl.len() == 1 {
            let control = ctrl[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyAnti,
            )?;
            self.revert_basis_2qb_filtered(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[control],
                false,
                false,
            )?;

            if !self.same_unit(control, target) {
                self.shards
                    .add_phase_angles(control, target, top_left, bottom_right);
                self.stats.gates_buffered += 1;
                return self.optimize_pair_buffers(control, target, false);
            }
        }

        self.ctrled_phase_invert(ctrl, target, false, false, top_left, bottom_right)
    }

    /// Anti-controlled phase on `target`
    pub fn mac_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;
        if is_one(top_left) && is_one(bottom_right) {
            return Ok(());
        }
        let Some(ctrl) = self.trim_controls(controls, true)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.phase(top_left, bottom_right, target);
        }
        if ctrl.len() == 1 && is_norm_zero(top_left - bottom_right) {
            return self.phase(top_left, ONE, ctrl[0]);
        }

        if !self.freeze_basis_2qb && ctrl.len() == 1 {
            let control = ctrl[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyCtrl,
            )?;
            self.revert_basis_2qb_filtered(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[control],
                false,
                false,
            )?;

            if !self.same_unit(control, target) {
                self.shards
                    .add_anti_phase_angles(control, target, top_left, bottom_right);
                self.stats.gates_buffered += 1;
                return self.optimize_pair_buffers(control, target, true);
            }
        }

        self.ctrled_phase_invert(ctrl, target, true, false, top_left, bottom_right)
    }

    /// Controlled inversion `antidiag(top_right, bottom_left)` on `target`
    pub fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;
        if is_one(top_right) && is_one(bottom_left) {
            let eps = self.config.separability_threshold;
            if self.shards[target].cached_plus(eps) {
                // |+⟩ is an X eigenstate; a controlled X cannot move it.
                return Ok(());
            }
        }
        let Some(ctrl) = self.trim_controls(controls, false)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.invert(top_right, bottom_left, target);
        }

        if !self.freeze_basis_2qb && ctrl.len() == 1 {
            let control = ctrl[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyAnti,
            )?;
            self.revert_basis_2qb_filtered(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[control],
                false,
                false,
            )?;

            if !self.same_unit(control, target) {
                self.shards
                    .add_inversion_angles(control, target, top_right, bottom_left);
                self.stats.gates_buffered += 1;
                return self.optimize_pair_buffers(control, target, false);
            }
        }

        self.ctrled_phase_invert(ctrl, target, false, true, top_right, bottom_left)
    }

    /// Anti-controlled inversion on `target`
    pub fn mac_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_index(target)?;
        if is_one(top_right) && is_one(bottom_left) {
            let eps = self.config.separability_threshold;
            if self.shards[target].cached_plus(eps) {
                return Ok(());
            }
        }
        let Some(ctrl) = self.trim_controls(controls, true)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.invert(top_right, bottom_left, target);
        }

        if !self.freeze_basis_2qb && ctrl.len() == 1 {
            let control = ctrl[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
            )?;
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyCtrl,
            )?;
            self.revert_basis_2qb_filtered(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[control],
                false,
                false,
            )?;

            if !self.same_unit(control, target) {
                self.shards
                    .add_anti_inversion_angles(control, target, top_right, bottom_left);
                self.stats.gates_buffered += 1;
                return self.optimize_pair_buffers(control, target, true);
            }
        }

        self.ctrled_phase_invert(ctrl, target, true, true, top_right, bottom_left)
    }

    /// Controlled general 2×2 matrix on `target`
    pub fn mc_mtrx(
        &mut self,
        controls: &[usize],
        m: &[Complex64; 4],
        target: usize,
    ) -> Result<()> {
        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            return self.mc_phase(controls, m[0], m[3], target);
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            return self.mc_invert(controls, m[1], m[2], target);
        }
        self.check_index(target)?;
        let Some(ctrl) = self.trim_controls(controls, false)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.mtrx(m, target);
        }
        self.ctrled_gen(ctrl, target, false, m)
    }

    /// Anti-controlled general 2×2 matrix on `target`
    pub fn mac_mtrx(
        &mut self,
        controls: &[usize],
        m: &[Complex64; 4],
        target: usize,
    ) -> Result<()> {
        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            return self.mac_phase(controls, m[0], m[3], target);
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            return self.mac_invert(controls, m[1], m[2], target);
        }
        self.check_index(target)?;
        let Some(ctrl) = self.trim_controls(controls, true)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return self.mtrx(m, target);
        }
        self.ctrled_gen(ctrl, target, true, m)
    }

    fn ctrled_gen(
        &mut self,
        controls: ControlVec,
        target: usize,
        anti: bool,
        m: &[Complex64; 4],
    ) -> Result<()> {
        let m = *m;
        self.apply_either_controlled(
            &controls,
            &[target],
            false,
            |engine, mapped_controls, mapped_targets, basis| {
                let trns = match basis {
                    Pauli::X => transform_x2x2(&m),
                    Pauli::Y => transform_y2x2(&m),
                    Pauli::Z => m,
                };
                if anti {
                    engine.mac_mtrx(mapped_controls, &trns, mapped_targets[0])
                } else {
                    engine.mc_mtrx(mapped_controls, &trns, mapped_targets[0])
                }
            },
        )
    }

    // ---------------------------------------------------------------------
    // Swap family
    // ---------------------------------------------------------------------

    /// Exchange two logical qubits — pure bookkeeping, no engine involved
    pub fn swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check_index(qubit1)?;
        self.check_index(qubit2)?;
        if qubit1 != qubit2 {
            self.shards.swap(qubit1, qubit2);
        }
        Ok(())
    }

    /// Both shards cache identical clean states with no pending buffers
    fn swap_ident(&self, qubit1: usize, qubit2: usize) -> bool {
        let (s1, s2) = (&self.shards[qubit1], &self.shards[qubit2]);
        let eps = self.config.separability_threshold;
        !s1.is_dirty()
            && !s2.is_dirty()
            && s1.pauli_basis == s2.pauli_basis
            && (s1.amp0 - s2.amp0).norm_sqr() <= eps
            && (s1.amp1 - s2.amp1).norm_sqr() <= eps
            && !s1.queued_phase()
            && !s2.queued_phase()
    }

    fn either_iswap(&mut self, qubit1: usize, qubit2: usize, inverse: bool) -> Result<()> {
        self.check_index(qubit1)?;
        self.check_index(qubit2)?;
        if qubit1 == qubit2 {
            return Ok(());
        }

        // Identical classical eigenstates have no exchanged branch, so the
        // iSwap phases never apply.
        if self.swap_ident(qubit1, qubit2)
            && (is_norm_zero(self.shards[qubit1].amp0) || is_norm_zero(self.shards[qubit1].amp1))
        {
            return Ok(());
        }

        if self.same_unit(qubit1, qubit2) {
            let unit = self.entangle(&[qubit1, qubit2])?;
            let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
            if inverse {
                self.engine_mut(unit).iswap_inv(m1, m2)?;
            } else {
                self.engine_mut(unit).iswap(m1, m2)?;
            }
            self.shards[qubit1].make_dirty();
            self.shards[qubit2].make_dirty();
            return Ok(());
        }

        let phase = if inverse { -I } else { I };
        self.mc_phase(&[qubit1], phase, ONE, qubit2)?;
        self.mc_phase(&[qubit2], phase, ONE, qubit1)?;
        self.shards.swap(qubit1, qubit2);
        Ok(())
    }

    /// Swap with an `i` phase on the exchanged branch
    pub fn iswap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.either_iswap(qubit1, qubit2, false)
    }

    /// Inverse of [`iswap`](Self::iswap)
    pub fn iswap_inv(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.either_iswap(qubit1, qubit2, true)
    }

    fn either_sqrt_swap(&mut self, qubit1: usize, qubit2: usize, inverse: bool) -> Result<()> {
        self.check_index(qubit1)?;
        self.check_index(qubit2)?;
        if qubit1 == qubit2 {
            return Ok(());
        }

        self.revert_basis_2qb(
            qubit1,
            RevertExclusivity::OnlyInvert,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
        )?;
        self.revert_basis_2qb(
            qubit2,
            RevertExclusivity::OnlyInvert,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
        )?;

        if self.swap_ident(qubit1, qubit2) {
            // Equal amplitude pairs are an eigenvector of the exchange.
            return Ok(());
        }

        let unit = self.entangle(&[qubit1, qubit2])?;
        let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
        if inverse {
            self.engine_mut(unit).isqrt_swap(m1, m2)?;
        } else {
            self.engine_mut(unit).sqrt_swap(m1, m2)?;
        }
        self.shards[qubit1].make_dirty();
        self.shards[qubit2].make_dirty();
        Ok(())
    }

    /// Square root of swap
    pub fn sqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.either_sqrt_swap(qubit1, qubit2, false)
    }

    /// Inverse square root of swap
    pub fn isqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.either_sqrt_swap(qubit1, qubit2, true)
    }

    fn ctrled_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
        anti: bool,
        sqrt: bool,
        inverse: bool,
    ) -> Result<()> {
        self.check_index(qubit1)?;
        self.check_index(qubit2)?;
        if qubit1 == qubit2 {
            return Ok(());
        }
        let Some(ctrl) = self.trim_controls(controls, anti)? else {
            return Ok(());
        };
        if ctrl.is_empty() {
            return if sqrt {
                self.either_sqrt_swap(qubit1, qubit2, inverse)
            } else {
                self.swap(qubit1, qubit2)
            };
        }
        self.apply_either_controlled(
            &ctrl,
            &[qubit1, qubit2],
            false,
            |engine, mapped_controls, mapped_targets, _| {
                if sqrt {
                    engine.mc_sqrt_swap(
                        mapped_controls,
                        mapped_targets[0],
                        mapped_targets[1],
                        anti,
                        inverse,
                    )
                } else {
                    engine.mc_swap(mapped_controls, mapped_targets[0], mapped_targets[1], anti)
                }
            },
        )
    }

    /// Controlled swap
    pub fn cswap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, false, false, false)
    }

    /// Anti-controlled swap
    pub fn anti_cswap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, true, false, false)
    }

    /// Controlled square root of swap
    pub fn csqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, false, true, false)
    }

    /// Anti-controlled square root of swap
    pub fn anti_csqrt_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
    ) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, true, true, false)
    }

    /// Controlled inverse square root of swap
    pub fn cisqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, false, true, true)
    }

    /// Anti-controlled inverse square root of swap
    pub fn anti_cisqrt_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
    ) -> Result<()> {
        self.ctrled_swap(controls, qubit1, qubit2, true, true, true)
    }
}
