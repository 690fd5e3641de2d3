//! Phase buffer graph operations
//!
//! The deferred-gate graph lives in the shards' four partner maps; every
//! edge is stored at both ends with an identical [`PhaseRelation`]. This
//! module owns all mutation of that graph: insertion with multiplicative
//! combination, the commutation rewrites that let single-qubit gates pass
//! through pending buffers, and the re-homing moves that keep symmetric
//! buffers deferred across a flush.
//!
//! Coefficient conventions (matching [`PhaseRelation`]): a normal-control
//! relation applies `diag(cmplx_diff, cmplx_same)` (or the antidiagonal of
//! the same pair) to the target when the control reads 1; an anti-control
//! relation applies `diag(cmplx_same, cmplx_diff)` when the control reads 0.

use crate::map::ShardMap;
use crate::shard::{PhaseRelation, Shard};
use num_complex::Complex64;
use sepq_engine::NORM_EPSILON;

const ONE: Complex64 = Complex64::new(1.0, 0.0);

pub(crate) fn is_norm_zero(c: Complex64) -> bool {
    c.norm_sqr() <= NORM_EPSILON
}

pub(crate) fn is_same(a: Complex64, b: Complex64) -> bool {
    is_norm_zero(a - b)
}

pub(crate) fn is_opposite(a: Complex64, b: Complex64) -> bool {
    is_norm_zero(a + b)
}

pub(crate) fn is_one(c: Complex64) -> bool {
    is_same(c, ONE)
}

/// Positive-real-axis test, with the modulus left free
pub(crate) fn is_arg_zero(c: Complex64) -> bool {
    c.arg().abs() <= 1e-9
}

pub(crate) fn is_arg_pi(c: Complex64) -> bool {
    (c.arg().abs() - std::f64::consts::PI).abs() <= 1e-9
}

/// Which side of an edge a qubit plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polarity {
    Normal,
    Anti,
}

fn control_side(shard: &mut Shard, polarity: Polarity) -> &mut ahash::AHashMap<usize, PhaseRelation> {
    match polarity {
        Polarity::Normal => &mut shard.targets_of,
        Polarity::Anti => &mut shard.anti_targets_of,
    }
}

fn target_side(shard: &mut Shard, polarity: Polarity) -> &mut ahash::AHashMap<usize, PhaseRelation> {
    match polarity {
        Polarity::Normal => &mut shard.controls_of,
        Polarity::Anti => &mut shard.anti_controls_of,
    }
}

impl ShardMap {
    fn two_mut(&mut self, a: usize, b: usize) -> (&mut Shard, &mut Shard) {
        debug_assert_ne!(a, b);
        // Index-disjoint split so both shards can be edited in one pass.
        if a < b {
            let (lo, hi) = self.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.split_at_mut(a);
            let second = &mut hi[0];
            (second, &mut lo[b])
        }
    }

    pub(crate) fn relation(
        &self,
        control: usize,
        target: usize,
        polarity: Polarity,
    ) -> Option<PhaseRelation> {
        match polarity {
            Polarity::Normal => self[target].controls_of.get(&control).copied(),
            Polarity::Anti => self[target].anti_controls_of.get(&control).copied(),
        }
    }

    /// Edit (creating if absent) the relation on edge `control → target`,
    /// writing the result to both ends, and dropping it if it lands on the
    /// identity
    pub(crate) fn edit_relation(
        &mut self,
        control: usize,
        target: usize,
        polarity: Polarity,
        f: impl FnOnce(&mut PhaseRelation),
    ) {
        let (c_shard, t_shard) = self.two_mut(control, target);
        let mut rel = target_side(t_shard, polarity)
            .get(&control)
            .copied()
            .unwrap_or_else(PhaseRelation::identity);
        f(&mut rel);
        if rel.is_identity(NORM_EPSILON) {
            target_side(t_shard, polarity).remove(&control);
            control_side(c_shard, polarity).remove(&target);
        } else {
            target_side(t_shard, polarity).insert(control, rel);
            control_side(c_shard, polarity).insert(target, rel);
        }
    }

    pub(crate) fn remove_relation(&mut self, control: usize, target: usize, polarity: Polarity) {
        let (c_shard, t_shard) = self.two_mut(control, target);
        target_side(t_shard, polarity).remove(&control);
        control_side(c_shard, polarity).remove(&target);
    }

    /// Combine a pending controlled phase `diag(top_left, bottom_right)`
    /// into the edge
    pub(crate) fn add_phase_angles(
        &mut self,
        control: usize,
        target: usize,
        top_left: Complex64,
        bottom_right: Complex64,
    ) {
        self.edit_relation(control, target, Polarity::Normal, |rel| {
            rel.cmplx_diff *= top_left;
            rel.cmplx_same *= bottom_right;
        });
    }

    /// Combine a pending anti-controlled phase `diag(top_left, bottom_right)`
    pub(crate) fn add_anti_phase_angles(
        &mut self,
        control: usize,
        target: usize,
        top_left: Complex64,
        bottom_right: Complex64,
    ) {
        self.edit_relation(control, target, Polarity::Anti, |rel| {
            rel.cmplx_diff *= bottom_right;
            rel.cmplx_same *= top_left;
        });
    }

    /// Compose a pending controlled inversion
    /// `antidiag(top_right, bottom_left)` onto the edge
    ///
    /// Composing `antidiag(x, y)` after `diag(d, s)` gives
    /// `antidiag(x·s, y·d)`, hence the swap-then-multiply.
    pub(crate) fn add_inversion_angles(
        &mut self,
        control: usize,
        target: usize,
        top_right: Complex64,
        bottom_left: Complex64,
    ) {
        self.edit_relation(control, target, Polarity::Normal, |rel| {
            rel.is_invert = !rel.is_invert;
            std::mem::swap(&mut rel.cmplx_diff, &mut rel.cmplx_same);
            rel.cmplx_diff *= top_right;
            rel.cmplx_same *= bottom_left;
        });
    }

    /// Compose a pending anti-controlled inversion
    pub(crate) fn add_anti_inversion_angles(
        &mut self,
        control: usize,
        target: usize,
        top_right: Complex64,
        bottom_left: Complex64,
    ) {
        self.edit_relation(control, target, Polarity::Anti, |rel| {
            rel.is_invert = !rel.is_invert;
            std::mem::swap(&mut rel.cmplx_diff, &mut rel.cmplx_same);
            rel.cmplx_diff *= bottom_left;
            rel.cmplx_same *= top_right;
        });
    }

    /// Commute an inversion applied to `qubit` through its pending buffers
    ///
    /// Buffers `qubit` controls trade polarity (a flipped control fires on
    /// the opposite value); buffers targeting `qubit` have their
    /// coefficient pair swapped (`X·diag(a,b)·X = diag(b,a)`, and likewise
    /// on the antidiagonal).
    pub(crate) fn flip_phase_anti(&mut self, qubit: usize) {
        // Target-side coefficient swaps, mirrored at the control end.
        for polarity in [Polarity::Normal, Polarity::Anti] {
            let partners: Vec<usize> = match polarity {
                Polarity::Normal => self[qubit].controls_of.keys().copied().collect(),
                Polarity::Anti => self[qubit].anti_controls_of.keys().copied().collect(),
            };
            for control in partners {
                self.edit_relation(control, qubit, polarity, |rel| {
                    std::mem::swap(&mut rel.cmplx_diff, &mut rel.cmplx_same);
                });
            }
        }

        // Control-side polarity exchange, mirrored at each target end.
        let targets: Vec<usize> = self[qubit]
            .targets_of
            .keys()
            .chain(self[qubit].anti_targets_of.keys())
            .copied()
            .collect();
        {
            let shard = &mut self[qubit];
            std::mem::swap(&mut shard.targets_of, &mut shard.anti_targets_of);
        }
        for target in targets {
            let t_shard = &mut self[target];
            let normal = t_shard.controls_of.remove(&qubit);
            let anti = t_shard.anti_controls_of.remove(&qubit);
            if let Some(rel) = normal {
                t_shard.anti_controls_of.insert(qubit, rel);
            }
            if let Some(rel) = anti {
                t_shard.controls_of.insert(qubit, rel);
            }
        }
    }

    /// Commute a phase gate `diag(top_left, bottom_right)` applied to
    /// `qubit` through the inversion buffers targeting it
    ///
    /// Diagonal buffers commute exactly; an inversion buffer `B` becomes
    /// `P·B·P⁻¹`, which scales its off-diagonal pair by `a/b` and `b/a`.
    pub(crate) fn commute_phase(
        &mut self,
        qubit: usize,
        top_left: Complex64,
        bottom_right: Complex64,
    ) {
        if is_same(top_left, bottom_right) {
            return;
        }
        let ratio = top_left / bottom_right;
        let inv_ratio = bottom_right / top_left;

        for polarity in [Polarity::Normal, Polarity::Anti] {
            let partners: Vec<usize> = match polarity {
                Polarity::Normal => self[qubit].controls_of.keys().copied().collect(),
                Polarity::Anti => self[qubit].anti_controls_of.keys().copied().collect(),
            };
            for control in partners {
                let Some(rel) = self.relation(control, qubit, polarity) else {
                    continue;
                };
                if !rel.is_invert {
                    continue;
                }
                let (top_scale, bottom_scale) = match polarity {
                    // Normal storage: (diff, same) = (top_right, bottom_left).
                    Polarity::Normal => (ratio, inv_ratio),
                    // Anti storage: (diff, same) = (bottom_left, top_right).
                    Polarity::Anti => (inv_ratio, ratio),
                };
                self.edit_relation(control, qubit, polarity, |rel| {
                    rel.cmplx_diff *= top_scale;
                    rel.cmplx_same *= bottom_scale;
                });
            }
        }
    }

    /// Conjugate the buffers targeting `qubit` by a Hadamard
    ///
    /// Only call once non-commutable buffers have been flushed: what may
    /// remain targeting the qubit is `diag(d, −d)` (which becomes
    /// `antidiag(d, d)`) or `antidiag(s, s)` (which becomes `diag(s, −s)`).
    pub(crate) fn commute_h_transform(&mut self, qubit: usize) {
        for polarity in [Polarity::Normal, Polarity::Anti] {
            let partners: Vec<usize> = match polarity {
                Polarity::Normal => self[qubit].controls_of.keys().copied().collect(),
                Polarity::Anti => self[qubit].anti_controls_of.keys().copied().collect(),
            };
            for control in partners {
                self.edit_relation(control, qubit, polarity, |rel| {
                    // The anti orientation stores the firing pair reversed,
                    // so the roles of the two coefficients trade places.
                    let flipped = !rel.is_invert;
                    match (polarity, flipped) {
                        (Polarity::Normal, true) => rel.cmplx_same = rel.cmplx_diff,
                        (Polarity::Normal, false) => rel.cmplx_same = -rel.cmplx_diff,
                        (Polarity::Anti, true) => rel.cmplx_diff = rel.cmplx_same,
                        (Polarity::Anti, false) => rel.cmplx_diff = -rel.cmplx_same,
                    }
                    rel.is_invert = flipped;
                });
            }
        }
    }

    /// Fold a control-and-target buffer pair between `qubit` and one
    /// partner into a single buffer where possible
    ///
    /// A phase buffer whose low coefficient sits on the positive real axis
    /// is control/target symmetric, so it can migrate to the other
    /// orientation of the same edge and merge multiplicatively.
    pub(crate) fn combine_gates(&mut self, qubit: usize) {
        for polarity in [Polarity::Normal, Polarity::Anti] {
            let partners: Vec<usize> = match polarity {
                Polarity::Normal => self[qubit].targets_of.keys().copied().collect(),
                Polarity::Anti => self[qubit].anti_targets_of.keys().copied().collect(),
            };
            for partner in partners {
                let Some(as_control) = self.relation(qubit, partner, polarity) else {
                    continue;
                };
                let Some(as_target) = self.relation(partner, qubit, polarity) else {
                    continue;
                };
                if as_control.is_invert || as_target.is_invert {
                    continue;
                }
                if is_arg_zero(as_control.cmplx_diff) {
                    self.remove_relation(qubit, partner, polarity);
                    self.merge_rehomed(partner, qubit, polarity, as_control);
                } else if is_arg_zero(as_target.cmplx_diff) {
                    self.remove_relation(partner, qubit, polarity);
                    self.merge_rehomed(qubit, partner, polarity, as_target);
                }
            }
        }
    }

    /// Move symmetric phase buffers `qubit` controls into the orientation
    /// where `qubit` is the target, so a control-side flush can skip them
    pub(crate) fn optimize_controls(&mut self, qubit: usize, polarity: Polarity) {
        let partners: Vec<usize> = match polarity {
            Polarity::Normal => self[qubit].targets_of.keys().copied().collect(),
            Polarity::Anti => self[qubit].anti_targets_of.keys().copied().collect(),
        };
        for partner in partners {
            let Some(rel) = self.relation(qubit, partner, polarity) else {
                continue;
            };
            if rel.is_invert || !is_arg_zero(rel.cmplx_diff) {
                continue;
            }
            self.remove_relation(qubit, partner, polarity);
            self.merge_rehomed(partner, qubit, polarity, rel);
        }
    }

    /// Mirror image of [`optimize_controls`](Self::optimize_controls):
    /// migrate symmetric buffers targeting `qubit` onto its control side
    pub(crate) fn optimize_targets(&mut self, qubit: usize, polarity: Polarity) {
        let partners: Vec<usize> = match polarity {
            Polarity::Normal => self[qubit].controls_of.keys().copied().collect(),
            Polarity::Anti => self[qubit].anti_controls_of.keys().copied().collect(),
        };
        for partner in partners {
            let Some(rel) = self.relation(partner, qubit, polarity) else {
                continue;
            };
            if rel.is_invert || !is_arg_zero(rel.cmplx_diff) {
                continue;
            }
            self.remove_relation(partner, qubit, polarity);
            self.merge_rehomed(qubit, partner, polarity, rel);
        }
    }

    /// Re-insert a relocated symmetric relation on the opposite
    /// orientation, preserving its stored coefficients
    fn merge_rehomed(
        &mut self,
        control: usize,
        target: usize,
        polarity: Polarity,
        moved: PhaseRelation,
    ) {
        self.edit_relation(control, target, polarity, |rel| {
            rel.cmplx_diff *= moved.cmplx_diff;
            rel.cmplx_same *= moved.cmplx_same;
        });
    }

    /// Drop every relation `qubit` controls with the given polarity
    /// (used when the qubit is learned to sit on the non-firing eigenstate)
    pub(crate) fn dump_controlled(&mut self, qubit: usize, polarity: Polarity) {
        let targets: Vec<usize> = match polarity {
            Polarity::Normal => self[qubit].targets_of.keys().copied().collect(),
            Polarity::Anti => self[qubit].anti_targets_of.keys().copied().collect(),
        };
        for target in targets {
            self.remove_relation(qubit, target, polarity);
        }
    }

    /// Drop relations `qubit` controls whose firing action is a pure phase
    /// on the partner (free when the control is a known eigenstate and
    /// global phase is untracked)
    pub(crate) fn dump_same_phase_controlled(&mut self, qubit: usize, polarity: Polarity) {
        let targets: Vec<usize> = match polarity {
            Polarity::Normal => self[qubit].targets_of.keys().copied().collect(),
            Polarity::Anti => self[qubit].anti_targets_of.keys().copied().collect(),
        };
        for target in targets {
            if let Some(rel) = self.relation(qubit, target, polarity) {
                if !rel.is_invert && is_same(rel.cmplx_diff, rel.cmplx_same) {
                    self.remove_relation(qubit, target, polarity);
                }
            }
        }
    }

    /// Drop every diagonal-phase relation touching `qubit`
    /// (diagonal phases cannot move any Z-basis probability)
    pub(crate) fn dump_phase_buffers(&mut self, qubit: usize) {
        let mut edges: Vec<(usize, usize, Polarity)> = Vec::new();
        let shard = &self[qubit];
        for (&t, rel) in &shard.targets_of {
            if !rel.is_invert {
                edges.push((qubit, t, Polarity::Normal));
            }
        }
        for (&t, rel) in &shard.anti_targets_of {
            if !rel.is_invert {
                edges.push((qubit, t, Polarity::Anti));
            }
        }
        for (&c, rel) in &shard.controls_of {
            if !rel.is_invert {
                edges.push((c, qubit, Polarity::Normal));
            }
        }
        for (&c, rel) in &shard.anti_controls_of {
            if !rel.is_invert {
                edges.push((c, qubit, Polarity::Anti));
            }
        }
        for (control, target, polarity) in edges {
            self.remove_relation(control, target, polarity);
        }
    }

    /// Strip the phase content from inversion relations targeting `qubit`
    /// (under a full-register measurement only the inversion itself can
    /// move an outcome)
    pub(crate) fn clear_invert_phase(&mut self, qubit: usize) {
        for polarity in [Polarity::Normal, Polarity::Anti] {
            let partners: Vec<usize> = match polarity {
                Polarity::Normal => self[qubit].controls_of.keys().copied().collect(),
                Polarity::Anti => self[qubit].anti_controls_of.keys().copied().collect(),
            };
            for control in partners {
                let Some(rel) = self.relation(control, qubit, polarity) else {
                    continue;
                };
                if !rel.is_invert {
                    continue;
                }
                self.edit_relation(control, qubit, polarity, |rel| {
                    rel.cmplx_diff = ONE;
                    rel.cmplx_same = ONE;
                });
            }
        }
    }

    fn split_at_mut(&mut self, mid: usize) -> (&mut [Shard], &mut [Shard]) {
        let slice = self.as_mut_slice();
        slice.split_at_mut(mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shard;

    fn map_of(n: usize) -> ShardMap {
        let mut m = ShardMap::new();
        for _ in 0..n {
            m.push(Shard::new_classical(false));
        }
        m
    }

    #[test]
    fn phase_angles_combine_multiplicatively() {
        let mut map = map_of(2);
        let z = Complex64::new(-1.0, 0.0);
        map.add_phase_angles(0, 1, ONE, z);
        map.add_phase_angles(0, 1, ONE, z);
        // Z·Z = I: the edge must have vanished.
        assert!(map.relation(0, 1, Polarity::Normal).is_none());
        map.assert_symmetric();
    }

    #[test]
    fn inversion_composes_to_phase() {
        let mut map = map_of(2);
        // X then X = I.
        map.add_inversion_angles(0, 1, ONE, ONE);
        map.add_inversion_angles(0, 1, ONE, ONE);
        assert!(map.relation(0, 1, Polarity::Normal).is_none());
        map.assert_symmetric();
    }

    #[test]
    fn invert_then_phase_keeps_invert() {
        let mut map = map_of(2);
        map.add_inversion_angles(0, 1, ONE, ONE);
        let i = Complex64::new(0.0, 1.0);
        map.add_phase_angles(0, 1, ONE, i);
        let rel = map.relation(0, 1, Polarity::Normal).unwrap();
        assert!(rel.is_invert);
        map.assert_symmetric();
    }

    #[test]
    fn flip_phase_anti_swaps_polarity_and_coefficients() {
        let mut map = map_of(3);
        let z = Complex64::new(-1.0, 0.0);
        // 0 controls 1; 2 controls 0.
        map.add_phase_angles(0, 1, ONE, z);
        map.add_phase_angles(2, 0, ONE, z);
        map.flip_phase_anti(0);
        // Control role went anti.
        assert!(map.relation(0, 1, Polarity::Normal).is_none());
        assert!(map.relation(0, 1, Polarity::Anti).is_some());
        // Target-side coefficients swapped: diag(1, -1) became diag(-1, 1).
        let rel = map.relation(2, 0, Polarity::Normal).unwrap();
        assert!(is_same(rel.cmplx_diff, z));
        assert!(is_same(rel.cmplx_same, ONE));
        map.assert_symmetric();
    }

    #[test]
    fn commute_h_toggles_cz_and_cnot() {
        let mut map = map_of(2);
        let z = Complex64::new(-1.0, 0.0);
        // CZ buffer targeting qubit 1.
        map.add_phase_angles(0, 1, ONE, z);
        map.commute_h_transform(1);
        let rel = map.relation(0, 1, Polarity::Normal).unwrap();
        assert!(rel.is_invert);
        assert!(is_same(rel.cmplx_diff, ONE));
        assert!(is_same(rel.cmplx_same, ONE));
        // And back again.
        map.commute_h_transform(1);
        let rel = map.relation(0, 1, Polarity::Normal).unwrap();
        assert!(!rel.is_invert);
        assert!(is_same(rel.cmplx_same, z));
        map.assert_symmetric();
    }

    #[test]
    fn optimize_controls_rehomes_symmetric_phase() {
        let mut map = map_of(2);
        let z = Complex64::new(0.0, 1.0);
        map.add_phase_angles(0, 1, ONE, z);
        // Qubit 0 is the control; migrate the buffer so 0 becomes target.
        map.optimize_controls(0, Polarity::Normal);
        assert!(map.relation(0, 1, Polarity::Normal).is_none());
        let rel = map.relation(1, 0, Polarity::Normal).unwrap();
        assert!(is_same(rel.cmplx_same, z));
        map.assert_symmetric();
    }
}
