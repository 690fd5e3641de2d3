//! The Entangler: merging backing units when a joint operation is
//! unavoidable
//!
//! Unit merging is a work-list reduction over the distinct units holding
//! the requested qubits: an odd straggler folds into the head, then units
//! merge pairwise per round, so no single unit is relocated more than
//! O(log n) times. After a range entangle, `order_contiguous` sorts the
//! unit so logical and physical adjacency coincide, paying one engine swap
//! per inversion.

use crate::error::Result;
use crate::register::QubitRegister;
use crate::shard::UnitId;

impl QubitRegister {
    /// Merge the units holding `bits` without touching anyone's frame
    ///
    /// Every affected shard's `(unit, mapped)` is rewritten as units fold
    /// together; the surviving unit's handle is returned.
    pub(crate) fn entangle_in_current_basis(&mut self, bits: &[usize]) -> Result<UnitId> {
        for &bit in bits {
            self.end_emulation(bit)?;
        }

        // Unique owning units, first-seen order.
        let mut units: Vec<UnitId> = Vec::with_capacity(bits.len());
        for &bit in bits {
            let id = self.shards[bit]
                .unit
                .expect("end_emulation left a shard without a unit");
            if !units.contains(&id) {
                units.push(id);
            }
        }

        while units.len() > 1 {
            // Fold the odd straggler into the head first.
            if units.len() & 1 == 1 {
                let consumed = units.remove(1);
                self.merge_units(units[0], consumed)?;
            }

            let mut next_round: Vec<UnitId> = Vec::with_capacity(units.len() / 2);
            for pair in units.chunks(2) {
                self.merge_units(pair[0], pair[1])?;
                next_round.push(pair[0]);
            }
            units = next_round;
        }

        Ok(units[0])
    }

    fn merge_units(&mut self, retained: UnitId, consumed: UnitId) -> Result<()> {
        let consumed_engine = self
            .units
            .remove(&consumed)
            .expect("work list references a unit that is no longer in the arena");

        let offset = match self
            .units
            .get_mut(&retained)
            .expect("work list references a unit that is no longer in the arena")
            .compose(consumed_engine.as_ref())
        {
            Ok(offset) => offset,
            Err(e) => {
                // The retained engine is untouched on a failed compose;
                // keep the arena consistent before propagating.
                self.units.insert(consumed, consumed_engine);
                return Err(e.into());
            }
        };
        self.stats.compositions += 1;

        for shard in self.shards.iter_mut() {
            if shard.unit == Some(consumed) {
                shard.unit = Some(retained);
                shard.mapped += offset;
            }
        }
        Ok(())
    }

    /// Entangle arbitrary qubits, forcing each to the permutation frame
    pub(crate) fn entangle(&mut self, bits: &[usize]) -> Result<UnitId> {
        let mut sorted = bits.to_vec();
        sorted.sort_unstable();
        for &bit in &sorted {
            self.to_perm_basis(bit)?;
        }
        self.entangle_in_current_basis(&sorted)
    }

    /// Entangle a contiguous logical range and order it contiguously
    pub(crate) fn entangle_range(
        &mut self,
        start: usize,
        length: usize,
        is_for_prob: bool,
    ) -> Result<UnitId> {
        if is_for_prob {
            self.to_perm_basis_prob_range(start, length)?;
        } else {
            self.to_perm_basis_range(start, length)?;
        }

        if length == 1 {
            self.end_emulation(start)?;
            return Ok(self.shards[start]
                .unit
                .expect("end_emulation left a shard without a unit"));
        }

        let bits: Vec<usize> = (start..start + length).collect();
        let unit = self.entangle_in_current_basis(&bits)?;
        self.order_contiguous(unit)?;
        Ok(unit)
    }

    pub(crate) fn entangle_all(&mut self, is_for_prob: bool) -> Result<UnitId> {
        self.entangle_range(0, self.qubit_count(), is_for_prob)
    }

    /// Sort a unit so ascending logical indices occupy ascending slots
    ///
    /// Partition sort over the unit's `(slot, logical)` pairs; each
    /// inversion costs one engine swap plus one shard-slot swap.
    pub(crate) fn order_contiguous(&mut self, unit: UnitId) -> Result<()> {
        if self.engine_ref(unit).qubit_count() <= 1 {
            return Ok(());
        }

        // (mapped slot, logical bit) for every shard in the unit.
        let mut entries: Vec<(usize, usize)> = Vec::new();
        for i in 0..self.qubit_count() {
            if self.shards[i].unit == Some(unit) {
                entries.push((self.shards[i].mapped, i));
            }
        }

        self.sort_unit(unit, &mut entries)
    }

    fn sort_unit(&mut self, unit: UnitId, entries: &mut [(usize, usize)]) -> Result<()> {
        let mut stack: Vec<(usize, usize)> = vec![(0, entries.len() - 1)];

        while let Some((low, high)) = stack.pop() {
            if low >= high {
                continue;
            }
            // Entries sit in logical order; sort the slot values into the
            // same order, swapping the physical qubits along the way.
            let pivot = entries[(low + high) / 2].0;
            let mut i = low;
            let mut j = high;
            while i <= j {
                while entries[i].0 < pivot {
                    i += 1;
                }
                while entries[j].0 > pivot {
                    j -= 1;
                }
                if i < j {
                    let (slot_i, bit_i) = entries[i];
                    let (slot_j, bit_j) = entries[j];
                    self.engine_mut(unit).swap(slot_i, slot_j)?;
                    self.shards[bit_i].mapped = slot_j;
                    self.shards[bit_j].mapped = slot_i;
                    entries[i].0 = slot_j;
                    entries[j].0 = slot_i;
                    i += 1;
                    j -= 1;
                } else if i == j {
                    i += 1;
                    if j > 0 {
                        j -= 1;
                    } else {
                        break;
                    }
                }
            }
            if low < j {
                stack.push((low, j));
            }
            if i < high {
                stack.push((i, high));
            }
        }
        Ok(())
    }
}
