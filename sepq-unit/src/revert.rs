//! Controlled flushing of the phase buffer graph
//!
//! `revert_basis_2qb` is the single gate through which deferred two-qubit
//! relations become real backing-engine operations. Its exclusivity
//! parameters let callers flush exactly the buffers that stand in the way
//! of an operation — invert-type only, one side of the edge only, one
//! control polarity only — and nothing else. The mandatory flush points are
//! probability reads, non-diagonal gates, and entangling a unit for an
//! unrelated reason; everything else stays deferred.

use crate::buffers::{is_arg_pi, is_arg_zero, is_norm_zero, is_one, is_opposite, is_same, Polarity};
use crate::error::Result;
use crate::register::{QubitRegister, ONE};
use crate::shard::{Pauli, PhaseRelation};

/// Which buffer types a flush touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertExclusivity {
    InvertAndPhase,
    OnlyInvert,
    OnlyPhase,
}

/// Which side of the qubit's edges a flush touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertControl {
    ControlsAndTargets,
    OnlyControls,
    OnlyTargets,
}

/// Which control polarity a flush touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertAnti {
    CtrlAndAnti,
    OnlyCtrl,
    OnlyAnti,
}

impl QubitRegister {
    /// Execute one deferred relation for real: entangle the two ends and
    /// issue the controlled gate on the merged unit
    pub(crate) fn apply_buffer(
        &mut self,
        rel: PhaseRelation,
        control: usize,
        target: usize,
        polarity: Polarity,
    ) -> Result<()> {
        let was_frozen = self.freeze_basis_2qb;
        self.freeze_basis_2qb = true;
        let result = match (rel.is_invert, polarity) {
            (true, Polarity::Normal) => {
                self.mc_invert(&[control], rel.cmplx_diff, rel.cmplx_same, target)
            }
            (true, Polarity::Anti) => {
                self.mac_invert(&[control], rel.cmplx_same, rel.cmplx_diff, target)
            }
            (false, Polarity::Normal) => {
                self.mc_phase(&[control], rel.cmplx_diff, rel.cmplx_same, target)
            }
            (false, Polarity::Anti) => {
                self.mac_phase(&[control], rel.cmplx_same, rel.cmplx_diff, target)
            }
        };
        self.freeze_basis_2qb = was_frozen;
        self.stats.buffers_flushed += 1;
        result
    }

    fn apply_buffer_map(
        &mut self,
        qubit: usize,
        qubit_is_control: bool,
        polarity: Polarity,
        exclusivity: RevertExclusivity,
        except_partners: &[usize],
        dump_skipped: bool,
    ) -> Result<()> {
        let snapshot: Vec<usize> = {
            let shard = &self.shards[qubit];
            match (qubit_is_control, polarity) {
                (true, Polarity::Normal) => shard.targets_of.keys().copied().collect(),
                (true, Polarity::Anti) => shard.anti_targets_of.keys().copied().collect(),
                (false, Polarity::Normal) => shard.controls_of.keys().copied().collect(),
                (false, Polarity::Anti) => shard.anti_controls_of.keys().copied().collect(),
            }
        };

        for partner in snapshot {
            let (control, target) = if qubit_is_control {
                (qubit, partner)
            } else {
                (partner, qubit)
            };
            // An earlier flush may have removed or rewritten this edge.
            let Some(rel) = self.shards.relation(control, target, polarity) else {
                continue;
            };

            let excluded = (exclusivity == RevertExclusivity::OnlyInvert && !rel.is_invert)
                || (exclusivity == RevertExclusivity::OnlyPhase && rel.is_invert)
                || except_partners.contains(&partner);
            if excluded {
                if dump_skipped {
                    self.shards.remove_relation(control, target, polarity);
                }
                continue;
            }

            self.shards.remove_relation(control, target, polarity);
            self.apply_buffer(rel, control, target, polarity)?;
        }
        Ok(())
    }

    /// Flush every buffered relation touching `qubit`
    pub(crate) fn revert_basis_2qb_full(&mut self, qubit: usize) -> Result<()> {
        self.revert_basis_2qb(
            qubit,
            RevertExclusivity::InvertAndPhase,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
        )
    }

    pub(crate) fn revert_basis_2qb(
        &mut self,
        qubit: usize,
        exclusivity: RevertExclusivity,
        control_exclusivity: RevertControl,
        anti_exclusivity: RevertAnti,
    ) -> Result<()> {
        self.revert_basis_2qb_filtered(
            qubit,
            exclusivity,
            control_exclusivity,
            anti_exclusivity,
            &[],
            &[],
            false,
            false,
        )
    }

    /// The controlled flush, in full generality
    ///
    /// Walks the four partner maps of `qubit` and applies every unexcluded
    /// buffer. `except_controlling` spares edges to the named partners on
    /// the control side; `except_targeted_by` spares edges from the named
    /// controls on the target side. `dump_skipped` discards excluded
    /// buffers instead of leaving them queued (callers use this when the
    /// skipped buffers provably cannot matter anymore).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn revert_basis_2qb_filtered(
        &mut self,
        qubit: usize,
        exclusivity: RevertExclusivity,
        control_exclusivity: RevertControl,
        anti_exclusivity: RevertAnti,
        except_controlling: &[usize],
        except_targeted_by: &[usize],
        dump_skipped: bool,
        skip_optimize: bool,
    ) -> Result<()> {
        if self.freeze_basis_2qb || !self.shards[qubit].queued_phase() {
            // Blocked recursive call, or nothing queued.
            return Ok(());
        }

        self.shards.combine_gates(qubit);

        if !skip_optimize && exclusivity != RevertExclusivity::OnlyInvert {
            if control_exclusivity == RevertControl::OnlyControls {
                if anti_exclusivity != RevertAnti::OnlyAnti {
                    self.shards.optimize_controls(qubit, Polarity::Normal);
                }
                if anti_exclusivity != RevertAnti::OnlyCtrl {
                    self.shards.optimize_controls(qubit, Polarity::Anti);
                }
            } else if control_exclusivity == RevertControl::OnlyTargets {
                if anti_exclusivity != RevertAnti::OnlyAnti {
                    self.shards.optimize_targets(qubit, Polarity::Normal);
                }
                if anti_exclusivity != RevertAnti::OnlyCtrl {
                    self.shards.optimize_targets(qubit, Polarity::Anti);
                }
            }
        }

        if control_exclusivity != RevertControl::OnlyTargets {
            if anti_exclusivity != RevertAnti::OnlyAnti {
                self.apply_buffer_map(
                    qubit,
                    true,
                    Polarity::Normal,
                    exclusivity,
                    except_controlling,
                    dump_skipped,
                )?;
            }
            if anti_exclusivity != RevertAnti::OnlyCtrl {
                self.apply_buffer_map(
                    qubit,
                    true,
                    Polarity::Anti,
                    exclusivity,
                    except_controlling,
                    dump_skipped,
                )?;
            }
        }

        if control_exclusivity == RevertControl::OnlyControls {
            return Ok(());
        }

        if anti_exclusivity != RevertAnti::OnlyAnti {
            self.apply_buffer_map(
                qubit,
                false,
                Polarity::Normal,
                exclusivity,
                except_targeted_by,
                dump_skipped,
            )?;
        }
        if anti_exclusivity != RevertAnti::OnlyCtrl {
            self.apply_buffer_map(
                qubit,
                false,
                Polarity::Anti,
                exclusivity,
                except_targeted_by,
                dump_skipped,
            )?;
        }
        Ok(())
    }

    /// Commute a Hadamard on `qubit` through its queued buffers
    ///
    /// CZ-shaped buffers the qubit controls are re-homed to the target side
    /// (a symmetric gate doesn't care which end is the control); remaining
    /// control-side buffers are flushed; target-side buffers that survive
    /// conjugation by H (`±Z`-like phases and `±X`-like inversions) are
    /// rewritten algebraically, and the rest are flushed.
    pub(crate) fn commute_h(&mut self, qubit: usize) -> Result<()> {
        if !self.shards[qubit].queued_phase() {
            return Ok(());
        }

        // Control side, normal polarity.
        let snapshot: Vec<usize> = self.shards[qubit].targets_of.keys().copied().collect();
        for partner in snapshot {
            let Some(rel) = self.shards.relation(qubit, partner, Polarity::Normal) else {
                continue;
            };
            if rel.is_invert {
                continue;
            }
            if is_arg_zero(rel.cmplx_diff) && is_arg_pi(rel.cmplx_same) {
                self.shards.remove_relation(qubit, partner, Polarity::Normal);
                self.shards.add_phase_angles(partner, qubit, ONE, -ONE);
            } else if is_arg_pi(rel.cmplx_diff) && is_arg_zero(rel.cmplx_same) {
                self.shards.remove_relation(qubit, partner, Polarity::Normal);
                self.shards.add_anti_phase_angles(partner, qubit, ONE, -ONE);
            }
        }

        // Control side, anti polarity.
        let snapshot: Vec<usize> = self.shards[qubit].anti_targets_of.keys().copied().collect();
        for partner in snapshot {
            let Some(rel) = self.shards.relation(qubit, partner, Polarity::Anti) else {
                continue;
            };
            if rel.is_invert {
                continue;
            }
            if is_arg_zero(rel.cmplx_diff) && is_arg_pi(rel.cmplx_same) {
                self.shards.remove_relation(qubit, partner, Polarity::Anti);
                self.shards.add_anti_phase_angles(partner, qubit, -ONE, ONE);
            } else if is_arg_pi(rel.cmplx_diff) && is_arg_zero(rel.cmplx_same) {
                self.shards.remove_relation(qubit, partner, Polarity::Anti);
                self.shards.add_phase_angles(partner, qubit, -ONE, ONE);
            }
        }

        // Whatever the qubit still controls cannot commute: flush it.
        self.revert_basis_2qb_filtered(
            qubit,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            false,
            true,
        )?;

        // Target side: flush everything that doesn't survive conjugation.
        for polarity in [Polarity::Normal, Polarity::Anti] {
            let snapshot: Vec<usize> = match polarity {
                Polarity::Normal => self.shards[qubit].controls_of.keys().copied().collect(),
                Polarity::Anti => self.shards[qubit].anti_controls_of.keys().copied().collect(),
            };
            for control in snapshot {
                let Some(rel) = self.shards.relation(control, qubit, polarity) else {
                    continue;
                };
                if is_opposite(rel.cmplx_diff, rel.cmplx_same) && !rel.is_invert {
                    continue;
                }
                if rel.is_invert && is_same(rel.cmplx_diff, rel.cmplx_same) {
                    continue;
                }
                self.shards.remove_relation(control, qubit, polarity);
                self.apply_buffer(rel, control, qubit, polarity)?;
            }
        }

        self.shards.commute_h_transform(qubit);
        Ok(())
    }

    /// Post-deferral cleanup for one edge: drop identities, flush a buffer
    /// whose ends have meanwhile fused into one unit, and fuse a
    /// normal/anti pair on the same edge into a plain single-qubit gate
    pub(crate) fn optimize_pair_buffers(
        &mut self,
        control: usize,
        target: usize,
        anti: bool,
    ) -> Result<()> {
        let polarity = if anti { Polarity::Anti } else { Polarity::Normal };
        let Some(buffer) = self.shards.relation(control, target, polarity) else {
            return Ok(());
        };

        if !buffer.is_invert {
            if is_one(buffer.cmplx_diff) && is_one(buffer.cmplx_same) {
                self.shards.remove_relation(control, target, polarity);
                return Ok(());
            }
            if self.same_unit(control, target) {
                self.shards.remove_relation(control, target, polarity);
                return self.apply_buffer(buffer, control, target, polarity);
            }
        }

        let opposite = if anti { Polarity::Normal } else { Polarity::Anti };
        let Some(other) = self.shards.relation(control, target, opposite) else {
            return Ok(());
        };
        if buffer.is_invert != other.is_invert {
            return Ok(());
        }

        let (mut normal_buf, mut anti_buf) = if anti {
            (other, buffer)
        } else {
            (buffer, other)
        };

        let was_invert = normal_buf.is_invert;
        if was_invert {
            // Both branches invert the target: pull one physical inversion
            // out in the target's own frame, leaving a phase pair behind.
            match self.shards[target].pauli_basis {
                Pauli::Y => self.y_base(target)?,
                Pauli::X => self.z_base(target)?,
                Pauli::Z => self.x_base(target)?,
            }
            for pol in [Polarity::Normal, Polarity::Anti] {
                self.shards
                    .edit_relation(control, target, pol, |rel| rel.is_invert = false);
            }
            normal_buf.is_invert = false;
            anti_buf.is_invert = false;
        }

        if is_norm_zero(normal_buf.cmplx_diff - anti_buf.cmplx_same)
            && is_norm_zero(normal_buf.cmplx_same - anti_buf.cmplx_diff)
        {
            // Both polarities now apply the identical diagonal: it is a
            // plain single-qubit phase on the target.
            self.shards
                .remove_relation(control, target, Polarity::Normal);
            self.shards.remove_relation(control, target, Polarity::Anti);
            self.phase(normal_buf.cmplx_diff, normal_buf.cmplx_same, target)?;
        }
        Ok(())
    }

    /// The qubit is known `|0⟩`: its normal-control buffers never fire, and
    /// its anti-control buffers fire with certainty
    pub(crate) fn flush_0_eigenstate(&mut self, qubit: usize) -> Result<()> {
        self.shards.dump_controlled(qubit, Polarity::Normal);
        // A firing pure-phase is a global phase on the partner, and free.
        self.shards.dump_same_phase_controlled(qubit, Polarity::Anti);
        self.revert_basis_2qb(
            qubit,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::OnlyAnti,
        )
    }

    /// The qubit is known `|1⟩`: mirror image of
    /// [`flush_0_eigenstate`](Self::flush_0_eigenstate)
    pub(crate) fn flush_1_eigenstate(&mut self, qubit: usize) -> Result<()> {
        self.shards.dump_controlled(qubit, Polarity::Anti);
        self.shards.dump_same_phase_controlled(qubit, Polarity::Normal);
        self.revert_basis_2qb(
            qubit,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::OnlyCtrl,
        )
    }

    /// Everything out of the way for an arbitrary operation on `qubit`
    pub(crate) fn to_perm_basis(&mut self, qubit: usize) -> Result<()> {
        self.revert_basis_1qb(qubit)?;
        self.revert_basis_2qb_full(qubit)
    }

    /// Just enough out of the way for a probability read on `qubit`:
    /// the Z frame, plus any pending inversions targeting it
    pub(crate) fn to_perm_basis_prob(&mut self, qubit: usize) -> Result<()> {
        self.revert_basis_1qb(qubit)?;
        self.revert_basis_2qb(
            qubit,
            RevertExclusivity::OnlyInvert,
            RevertControl::OnlyTargets,
            RevertAnti::CtrlAndAnti,
        )
    }

    /// Flush for a destructive measurement: pending inversions anywhere on
    /// the qubit are applied, and diagonal phases (which cannot move any
    /// Z-basis probability) are discarded
    pub(crate) fn to_perm_basis_measure(&mut self, qubit: usize) -> Result<()> {
        self.revert_basis_1qb(qubit)?;
        self.revert_basis_2qb_filtered(
            qubit,
            RevertExclusivity::OnlyInvert,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            true,
            false,
        )
    }

    pub(crate) fn to_perm_basis_all(&mut self) -> Result<()> {
        for qubit in 0..self.qubit_count() {
            self.to_perm_basis(qubit)?;
        }
        Ok(())
    }

    pub(crate) fn to_perm_basis_prob_all(&mut self) -> Result<()> {
        for qubit in 0..self.qubit_count() {
            self.to_perm_basis_prob(qubit)?;
        }
        Ok(())
    }

    pub(crate) fn to_perm_basis_range(&mut self, start: usize, length: usize) -> Result<()> {
        for qubit in start..start + length {
            self.to_perm_basis(qubit)?;
        }
        Ok(())
    }

    pub(crate) fn to_perm_basis_prob_range(&mut self, start: usize, length: usize) -> Result<()> {
        for qubit in start..start + length {
            self.to_perm_basis_prob(qubit)?;
        }
        Ok(())
    }
}
