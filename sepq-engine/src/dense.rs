//! Dense CPU state-vector engine
//!
//! The exact, general-purpose member of the engine set: a full `2^n`
//! amplitude buffer driven by the scalar kernels. Measurement collapse and
//! multishot sampling draw from an engine-owned RNG so runs are
//! reproducible under a fixed seed.

use crate::engine::{check_index, EngineKind, StateEngine, NORM_EPSILON};
use crate::error::{EngineError, Result};
use crate::kernels;
use crate::state_vector::StateVector;
use ahash::AHashMap;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// CPU state-vector register
pub struct DenseEngine {
    state: StateVector,
    rng: StdRng,
    running_norm: f64,
}

impl DenseEngine {
    /// Allocate a register in the classical state `perm`
    pub fn new(num_qubits: usize, perm: u64, seed: Option<u64>) -> Result<Self> {
        Ok(Self {
            state: StateVector::new(num_qubits, perm)?,
            rng: match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            },
            running_norm: 1.0,
        })
    }

    fn check(&self, index: usize) -> Result<()> {
        check_index(index, self.state.num_qubits())
    }

    /// Packed marginal distribution over the bits selected by `q_powers`
    fn marginal(&self, q_powers: &[u64]) -> AHashMap<u64, f64> {
        let mut dist: AHashMap<u64, f64> = AHashMap::new();
        for (i, amp) in self.state.amplitudes().iter().enumerate() {
            let p = amp.norm_sqr();
            if p <= 0.0 {
                continue;
            }
            let mut key = 0u64;
            for (bit, &power) in q_powers.iter().enumerate() {
                if i as u64 & power != 0 {
                    key |= 1 << bit;
                }
            }
            *dist.entry(key).or_insert(0.0) += p;
        }
        dist
    }
}

impl StateEngine for DenseEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DenseCpu
    }

    fn qubit_count(&self) -> usize {
        self.state.num_qubits()
    }

    fn compose(&mut self, other: &dyn StateEngine) -> Result<usize> {
        let other_amps = other.get_quantum_state();
        self.state.compose(&other_amps, other.qubit_count())
    }

    fn decompose(&mut self, start: usize, dest: &mut dyn StateEngine) -> Result<()> {
        let length = dest.qubit_count();
        check_index(start + length - 1, self.state.num_qubits())?;
        let (kept, extracted) = self.state.factor_range(start, length);
        dest.set_quantum_state(&extracted)?;
        self.state
            .replace_with(self.state.num_qubits() - length, &kept)
    }

    fn dispose(&mut self, start: usize, length: usize, known_value: Option<u64>) -> Result<()> {
        check_index(start + length - 1, self.state.num_qubits())?;
        match known_value {
            Some(value) => self.state.project_range(start, length, value),
            None => {
                let (kept, _) = self.state.factor_range(start, length);
                self.state
                    .replace_with(self.state.num_qubits() - length, &kept)
            }
        }
    }

    fn try_decompose(
        &mut self,
        start: usize,
        dest: &mut dyn StateEngine,
        tolerance: f64,
    ) -> Result<bool> {
        let length = dest.qubit_count();
        check_index(start + length - 1, self.state.num_qubits())?;
        let (kept, extracted) = self.state.factor_range(start, length);
        if self
            .state
            .reconstruction_error(start, length, &kept, &extracted)
            > tolerance
        {
            return Ok(false);
        }
        dest.set_quantum_state(&extracted)?;
        self.state
            .replace_with(self.state.num_qubits() - length, &kept)?;
        Ok(true)
    }

    fn clone_boxed(&self) -> Box<dyn StateEngine> {
        Box::new(Self {
            state: self.state.clone(),
            rng: self.rng.clone(),
            running_norm: self.running_norm,
        })
    }

    fn get_quantum_state(&self) -> Vec<Complex64> {
        self.state.amplitudes().to_vec()
    }

    fn set_quantum_state(&mut self, amplitudes: &[Complex64]) -> Result<()> {
        if amplitudes.len() != self.state.dimension() {
            return Err(EngineError::DimensionMismatch {
                expected: self.state.dimension(),
                actual: amplitudes.len(),
            });
        }
        self.state.amplitudes_mut().copy_from_slice(amplitudes);
        self.running_norm = 1.0;
        Ok(())
    }

    fn get_amplitude(&self, perm: u64) -> Result<Complex64> {
        if perm as usize >= self.state.dimension() {
            return Err(EngineError::DimensionMismatch {
                expected: self.state.dimension(),
                actual: perm as usize,
            });
        }
        Ok(self.state.amplitudes()[perm as usize])
    }

    fn prob(&self, index: usize) -> Result<f64> {
        self.check(index)?;
        Ok(kernels::prob_of_bit(self.state.amplitudes(), index).clamp(0.0, 1.0))
    }

    fn force_m(
        &mut self,
        index: usize,
        result: bool,
        do_force: bool,
        do_apply: bool,
    ) -> Result<bool> {
        self.check(index)?;
        let prob_one = kernels::prob_of_bit(self.state.amplitudes(), index).clamp(0.0, 1.0);

        let outcome = if do_force {
            let branch = if result { prob_one } else { 1.0 - prob_one };
            if branch <= NORM_EPSILON {
                return Err(EngineError::ImpossibleOutcome { index });
            }
            result
        } else if prob_one >= 1.0 - NORM_EPSILON {
            true
        } else if prob_one <= NORM_EPSILON {
            false
        } else {
            self.rng.gen::<f64>() < prob_one
        };

        if do_apply {
            let branch = if outcome { prob_one } else { 1.0 - prob_one };
            kernels::collapse_bit(self.state.amplitudes_mut(), index, outcome, branch);
            self.running_norm = 1.0;
        }

        Ok(outcome)
    }

    fn multi_shot_measure_mask(
        &mut self,
        q_powers: &[u64],
        shots: u32,
    ) -> Result<AHashMap<u64, u32>> {
        let dist = self.marginal(q_powers);

        // Cumulative table; one binary search per shot.
        let mut table: Vec<(u64, f64)> = Vec::with_capacity(dist.len());
        let mut cum = 0.0;
        for (key, p) in dist {
            cum += p;
            table.push((key, cum));
        }

        let mut counts: AHashMap<u64, u32> = AHashMap::new();
        if table.is_empty() {
            return Ok(counts);
        }
        for _ in 0..shots {
            let r = self.rng.gen::<f64>() * cum;
            let slot = table.partition_point(|&(_, c)| c < r);
            let key = table[slot.min(table.len() - 1)].0;
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn mtrx(&mut self, mtrx: &[Complex64; 4], target: usize) -> Result<()> {
        self.check(target)?;
        kernels::apply_1qb(self.state.amplitudes_mut(), mtrx, target);
        Ok(())
    }

    fn phase(&mut self, top_left: Complex64, bottom_right: Complex64, target: usize) -> Result<()> {
        self.check(target)?;
        kernels::apply_phase(self.state.amplitudes_mut(), top_left, bottom_right, target);
        Ok(())
    }

    fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check(target)?;
        kernels::apply_invert(self.state.amplitudes_mut(), top_right, bottom_left, target);
        Ok(())
    }

    fn mc_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize) -> Result<()> {
        self.check(target)?;
        for &c in controls {
            self.check(c)?;
        }
        kernels::apply_controlled_1qb(self.state.amplitudes_mut(), controls, mtrx, target, true);
        Ok(())
    }

    fn mac_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize) -> Result<()> {
        self.check(target)?;
        for &c in controls {
            self.check(c)?;
        }
        kernels::apply_controlled_1qb(self.state.amplitudes_mut(), controls, mtrx, target, false);
        Ok(())
    }

    fn swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        if qubit1 != qubit2 {
            kernels::apply_swap(self.state.amplitudes_mut(), qubit1, qubit2);
        }
        Ok(())
    }

    fn iswap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        let i = Complex64::new(0.0, 1.0);
        kernels::apply_swap_block(self.state.amplitudes_mut(), &[ZERO, i, i, ZERO], qubit1, qubit2);
        Ok(())
    }

    fn iswap_inv(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        let ni = Complex64::new(0.0, -1.0);
        kernels::apply_swap_block(
            self.state.amplitudes_mut(),
            &[ZERO, ni, ni, ZERO],
            qubit1,
            qubit2,
        );
        Ok(())
    }

    fn sqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        let half_p = Complex64::new(0.5, 0.5);
        let half_m = Complex64::new(0.5, -0.5);
        kernels::apply_swap_block(
            self.state.amplitudes_mut(),
            &[half_p, half_m, half_m, half_p],
            qubit1,
            qubit2,
        );
        Ok(())
    }

    fn isqrt_swap(&mut self, qubit1: usize, qubit2: usize) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        let half_p = Complex64::new(0.5, 0.5);
        let half_m = Complex64::new(0.5, -0.5);
        kernels::apply_swap_block(
            self.state.amplitudes_mut(),
            &[half_m, half_p, half_p, half_m],
            qubit1,
            qubit2,
        );
        Ok(())
    }

    fn mc_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
        anti: bool,
    ) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        for &c in controls {
            self.check(c)?;
        }
        let one = Complex64::new(1.0, 0.0);
        kernels::apply_controlled_swap_block(
            self.state.amplitudes_mut(),
            controls,
            &[ZERO, one, one, ZERO],
            qubit1,
            qubit2,
            !anti,
        );
        Ok(())
    }

    fn mc_sqrt_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
        anti: bool,
        inverse: bool,
    ) -> Result<()> {
        self.check(qubit1)?;
        self.check(qubit2)?;
        for &c in controls {
            self.check(c)?;
        }
        let half_p = Complex64::new(0.5, 0.5);
        let half_m = Complex64::new(0.5, -0.5);
        let block = if inverse {
            [half_m, half_p, half_p, half_m]
        } else {
            [half_p, half_m, half_m, half_p]
        };
        kernels::apply_controlled_swap_block(
            self.state.amplitudes_mut(),
            controls,
            &block,
            qubit1,
            qubit2,
            !anti,
        );
        Ok(())
    }

    fn sum_sqr_diff(&self, other: &dyn StateEngine) -> Result<f64> {
        let mine = self.state.amplitudes();
        let theirs = other.get_quantum_state();
        if mine.len() != theirs.len() {
            return Ok(1.0);
        }
        let overlap: Complex64 = mine
            .iter()
            .zip(theirs.iter())
            .map(|(a, b)| a.conj() * b)
            .sum();
        Ok((1.0 - overlap.norm_sqr()).clamp(0.0, 1.0))
    }

    fn update_running_norm(&mut self) {
        self.running_norm = self.state.norm_sqr();
    }

    fn normalize_state(&mut self) {
        if (self.running_norm - 1.0).abs() > NORM_EPSILON {
            self.state.normalize();
            self.running_norm = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQRT1_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

    fn h() -> [Complex64; 4] {
        [
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(-SQRT1_2, 0.0),
        ]
    }

    fn x() -> [Complex64; 4] {
        [
            ZERO,
            Complex64::new(1.0, 0.0),
            Complex64::new(1.0, 0.0),
            ZERO,
        ]
    }

    #[test]
    fn bell_pair_probabilities() {
        let mut eng = DenseEngine::new(2, 0, Some(7)).unwrap();
        eng.mtrx(&h(), 0).unwrap();
        eng.mc_mtrx(&[0], &x(), 1).unwrap();
        approx::assert_abs_diff_eq!(eng.prob(0).unwrap(), 0.5, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(eng.prob(1).unwrap(), 0.5, epsilon = 1e-12);
        let amps = eng.get_quantum_state();
        assert!((amps[0].norm_sqr() - 0.5).abs() < 1e-12);
        assert!((amps[3].norm_sqr() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn forced_measurement_collapses() {
        let mut eng = DenseEngine::new(1, 0, Some(7)).unwrap();
        eng.mtrx(&h(), 0).unwrap();
        let outcome = eng.force_m(0, true, true, true).unwrap();
        assert!(outcome);
        assert!((eng.prob(0).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn forcing_impossible_outcome_errors() {
        let mut eng = DenseEngine::new(1, 0, Some(7)).unwrap();
        let err = eng.force_m(0, true, true, true).unwrap_err();
        assert!(matches!(err, EngineError::ImpossibleOutcome { .. }));
    }

    #[test]
    fn compose_then_try_decompose_round_trips() {
        let mut a = DenseEngine::new(1, 0, Some(7)).unwrap();
        a.mtrx(&h(), 0).unwrap();
        let b = DenseEngine::new(1, 1, Some(8)).unwrap();
        let offset = a.compose(&b).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(a.qubit_count(), 2);

        let mut dest = DenseEngine::new(1, 0, Some(9)).unwrap();
        assert!(a.try_decompose(1, &mut dest, 1e-10).unwrap());
        assert_eq!(a.qubit_count(), 1);
        assert!((dest.prob(0).unwrap() - 1.0).abs() < 1e-12);
        assert!((a.prob(0).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn try_decompose_declines_entangled_state() {
        let mut eng = DenseEngine::new(2, 0, Some(7)).unwrap();
        eng.mtrx(&h(), 0).unwrap();
        eng.mc_mtrx(&[0], &x(), 1).unwrap();
        let mut dest = DenseEngine::new(1, 0, Some(9)).unwrap();
        assert!(!eng.try_decompose(1, &mut dest, 1e-10).unwrap());
        assert_eq!(eng.qubit_count(), 2);
    }

    #[test]
    fn multishot_respects_distribution() {
        let mut eng = DenseEngine::new(2, 0, Some(7)).unwrap();
        eng.mtrx(&h(), 0).unwrap();
        eng.mc_mtrx(&[0], &x(), 1).unwrap();
        let counts = eng.multi_shot_measure_mask(&[1, 2], 1000).unwrap();
        // Bell state: only 00 and 11 appear.
        assert_eq!(counts.get(&1), None);
        assert_eq!(counts.get(&2), None);
        let total: u32 = counts.values().sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn sum_sqr_diff_detects_divergence() {
        let a = DenseEngine::new(2, 0, Some(7)).unwrap();
        let b = DenseEngine::new(2, 0, Some(8)).unwrap();
        assert!(a.sum_sqr_diff(&b).unwrap() < 1e-12);
        let c = DenseEngine::new(2, 3, Some(9)).unwrap();
        assert!((a.sum_sqr_diff(&c).unwrap() - 1.0).abs() < 1e-12);
    }
}
