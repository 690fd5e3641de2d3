//! Scalar gate kernels over amplitude buffers
//!
//! Each kernel walks the basis states touched by the gate and applies the
//! 2×2 block in place. Pairing scheme: for a gate on qubit `q`, amplitudes
//! `i` and `i | (1 << q)` form one block, and only indices with the `q` bit
//! clear are visited. Probability reductions are the one place data
//! parallelism pays off here, and they use rayon above a size threshold.

use num_complex::Complex64;
use rayon::prelude::*;

/// Minimum dimension before probability reductions go parallel
const PARALLEL_DIM_THRESHOLD: usize = 1 << 14;

/// Apply a 2×2 matrix to `qubit`
pub fn apply_1qb(state: &mut [Complex64], mtrx: &[Complex64; 4], qubit: usize) {
    let mask = 1usize << qubit;
    let [m00, m01, m10, m11] = *mtrx;

    for i in 0..state.len() {
        if i & mask != 0 {
            continue;
        }
        let j = i | mask;
        let amp0 = state[i];
        let amp1 = state[j];
        state[i] = m00 * amp0 + m01 * amp1;
        state[j] = m10 * amp0 + m11 * amp1;
    }
}

/// Apply a diagonal gate `diag(top_left, bottom_right)` to `qubit`
///
/// Touches every amplitude exactly once; no pairing required.
pub fn apply_phase(
    state: &mut [Complex64],
    top_left: Complex64,
    bottom_right: Complex64,
    qubit: usize,
) {
    let mask = 1usize << qubit;
    for (i, amp) in state.iter_mut().enumerate() {
        *amp *= if i & mask == 0 { top_left } else { bottom_right };
    }
}

/// Apply an antidiagonal gate `[[0, top_right], [bottom_left, 0]]` to `qubit`
pub fn apply_invert(
    state: &mut [Complex64],
    top_right: Complex64,
    bottom_left: Complex64,
    qubit: usize,
) {
    let mask = 1usize << qubit;
    for i in 0..state.len() {
        if i & mask != 0 {
            continue;
        }
        let j = i | mask;
        let amp0 = state[i];
        state[i] = top_right * state[j];
        state[j] = bottom_left * amp0;
    }
}

/// Apply a 2×2 matrix to `target`, conditioned on every control bit
/// matching `polarity` (1 for controls, 0 for anti-controls)
pub fn apply_controlled_1qb(
    state: &mut [Complex64],
    controls: &[usize],
    mtrx: &[Complex64; 4],
    target: usize,
    polarity: bool,
) {
    let target_mask = 1usize << target;
    let control_mask: usize = controls.iter().map(|&c| 1usize << c).sum();
    let fire_value = if polarity { control_mask } else { 0 };
    let [m00, m01, m10, m11] = *mtrx;

    for i in 0..state.len() {
        if i & target_mask != 0 || i & control_mask != fire_value {
            continue;
        }
        let j = i | target_mask;
        let amp0 = state[i];
        let amp1 = state[j];
        state[i] = m00 * amp0 + m01 * amp1;
        state[j] = m10 * amp0 + m11 * amp1;
    }
}

/// Exchange the amplitudes of two qubits
pub fn apply_swap(state: &mut [Complex64], qubit1: usize, qubit2: usize) {
    let m1 = 1usize << qubit1;
    let m2 = 1usize << qubit2;
    for i in 0..state.len() {
        // Visit each (01, 10) pair once, from the qubit1-set side.
        if i & m1 == 0 || i & m2 != 0 {
            continue;
        }
        let j = (i & !m1) | m2;
        state.swap(i, j);
    }
}

/// Apply the two-qubit block `[[a, b], [c, d]]` on the swap-coupled pair
/// of basis states `(01, 10)` for qubits `(qubit1, qubit2)`
///
/// Covers the whole swap family: ISwap and its inverse are `a = d = 0` with
/// imaginary off-diagonals, SqrtSwap and its inverse are the
/// `(1 ± i) / 2` blends.
pub fn apply_swap_block(
    state: &mut [Complex64],
    block: &[Complex64; 4],
    qubit1: usize,
    qubit2: usize,
) {
    let m1 = 1usize << qubit1;
    let m2 = 1usize << qubit2;
    let [a, b, c, d] = *block;
    for i in 0..state.len() {
        if i & m1 == 0 || i & m2 != 0 {
            continue;
        }
        let j = (i & !m1) | m2;
        let amp10 = state[i];
        let amp01 = state[j];
        state[i] = a * amp10 + b * amp01;
        state[j] = c * amp10 + d * amp01;
    }
}

/// Controlled variant of [`apply_swap_block`]: the block only acts where
/// every control bit matches `polarity`
pub fn apply_controlled_swap_block(
    state: &mut [Complex64],
    controls: &[usize],
    block: &[Complex64; 4],
    qubit1: usize,
    qubit2: usize,
    polarity: bool,
) {
    let m1 = 1usize << qubit1;
    let m2 = 1usize << qubit2;
    let control_mask: usize = controls.iter().map(|&c| 1usize << c).sum();
    let fire_value = if polarity { control_mask } else { 0 };
    let [a, b, c, d] = *block;
    for i in 0..state.len() {
        if i & m1 == 0 || i & m2 != 0 || i & control_mask != fire_value {
            continue;
        }
        let j = (i & !m1) | m2;
        let amp10 = state[i];
        let amp01 = state[j];
        state[i] = a * amp10 + b * amp01;
        state[j] = c * amp10 + d * amp01;
    }
}

/// Probability that `qubit` reads 1
pub fn prob_of_bit(state: &[Complex64], qubit: usize) -> f64 {
    let mask = 1usize << qubit;
    if state.len() >= PARALLEL_DIM_THRESHOLD {
        state
            .par_iter()
            .enumerate()
            .filter(|&(i, _)| i & mask != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum()
    } else {
        state
            .iter()
            .enumerate()
            .filter(|&(i, _)| i & mask != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum()
    }
}

/// Collapse `qubit` to `value`, zeroing the other branch and renormalizing
/// by the branch probability
pub fn collapse_bit(state: &mut [Complex64], qubit: usize, value: bool, branch_prob: f64) {
    let mask = 1usize << qubit;
    let keep_value = if value { mask } else { 0 };
    let inv = 1.0 / branch_prob.sqrt();
    for (i, amp) in state.iter_mut().enumerate() {
        if i & mask == keep_value {
            *amp *= inv;
        } else {
            *amp = Complex64::new(0.0, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQRT1_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

    fn h_matrix() -> [Complex64; 4] {
        [
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(SQRT1_2, 0.0),
            Complex64::new(-SQRT1_2, 0.0),
        ]
    }

    #[test]
    fn hadamard_splits_amplitude() {
        let mut state = vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        apply_1qb(&mut state, &h_matrix(), 0);
        assert!((state[0].re - SQRT1_2).abs() < 1e-12);
        assert!((state[1].re - SQRT1_2).abs() < 1e-12);
    }

    #[test]
    fn controlled_invert_is_cnot() {
        // |10> (control qubit 0 set)
        let mut state = vec![Complex64::new(0.0, 0.0); 4];
        state[1] = Complex64::new(1.0, 0.0);
        let x = [
            Complex64::new(0.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 0.0),
        ];
        apply_controlled_1qb(&mut state, &[0], &x, 1, true);
        assert!((state[3].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn anti_controlled_fires_on_zero() {
        let mut state = vec![Complex64::new(0.0, 0.0); 4];
        state[0] = Complex64::new(1.0, 0.0);
        let x = [
            Complex64::new(0.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 0.0),
        ];
        apply_controlled_1qb(&mut state, &[0], &x, 1, false);
        assert!((state[2].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn swap_exchanges_bits() {
        let mut state = vec![Complex64::new(0.0, 0.0); 4];
        state[1] = Complex64::new(1.0, 0.0); // |01>
        apply_swap(&mut state, 0, 1);
        assert!((state[2].re - 1.0).abs() < 1e-12); // |10>
    }

    #[test]
    fn prob_and_collapse_agree() {
        let mut state = vec![
            Complex64::new(0.6, 0.0),
            Complex64::new(0.8, 0.0),
        ];
        let p1 = prob_of_bit(&state, 0);
        assert!((p1 - 0.64).abs() < 1e-12);
        collapse_bit(&mut state, 0, true, p1);
        assert!((state[1].norm() - 1.0).abs() < 1e-12);
        assert_eq!(state[0], Complex64::new(0.0, 0.0));
    }
}
