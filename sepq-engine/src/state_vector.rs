//! State vector storage with aligned memory
//!
//! The amplitude buffer backing a register is allocated with 64-byte
//! alignment so gate kernels can assume cache-line-aligned access. The
//! buffer is resized only through whole-register rebuilds (`compose`,
//! `extract_range`, `project_range`), which is how the unit layer grows
//! and shrinks registers.

use crate::error::{EngineError, Result};
use num_complex::Complex64;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment requirement for the amplitude buffer (one cache line)
const BUFFER_ALIGNMENT: usize = 64;

/// Hard cap on register width; above this the allocation is refused
pub const MAX_QUBITS: usize = 30;

/// Complex amplitude vector of dimension `2^num_qubits`, 64-byte aligned
///
/// Basis-state convention: bit `i` of an amplitude index is the value of
/// qubit `i`, so qubit 0 is the least significant bit.
#[derive(Debug)]
pub struct StateVector {
    num_qubits: usize,
    dimension: usize,
    data: NonNull<Complex64>,
    layout: Layout,
}

impl StateVector {
    /// Create a state vector initialized to the classical state `perm`
    ///
    /// # Errors
    /// Returns [`EngineError::AllocationFailure`] if the buffer cannot be
    /// allocated or `num_qubits` exceeds [`MAX_QUBITS`].
    pub fn new(num_qubits: usize, perm: u64) -> Result<Self> {
        let state = Self::zeroed(num_qubits)?;
        unsafe {
            *state.data.as_ptr().add(perm as usize) = Complex64::new(1.0, 0.0);
        }
        Ok(state)
    }

    /// Create a state vector with every amplitude zero
    ///
    /// The caller is responsible for writing a normalized state before the
    /// vector is used.
    pub fn zeroed(num_qubits: usize) -> Result<Self> {
        let dimension = 1usize << num_qubits.min(MAX_QUBITS);
        let size = dimension * std::mem::size_of::<Complex64>();

        if num_qubits > MAX_QUBITS {
            return Err(EngineError::AllocationFailure { size, num_qubits });
        }

        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT)
            .map_err(|_| EngineError::AllocationFailure { size, num_qubits })?;

        let data = unsafe {
            let ptr = alloc(layout) as *mut Complex64;
            if ptr.is_null() {
                return Err(EngineError::AllocationFailure { size, num_qubits });
            }
            std::ptr::write_bytes(ptr, 0, dimension);
            NonNull::new_unchecked(ptr)
        };

        Ok(Self {
            num_qubits,
            dimension,
            data,
            layout,
        })
    }

    /// Create a state vector from existing amplitudes
    ///
    /// # Errors
    /// Returns [`EngineError::DimensionMismatch`] if `amplitudes.len()` is
    /// not `2^num_qubits`.
    pub fn from_amplitudes(num_qubits: usize, amplitudes: &[Complex64]) -> Result<Self> {
        if num_qubits > MAX_QUBITS {
            return Err(EngineError::AllocationFailure {
                size: amplitudes.len() * std::mem::size_of::<Complex64>(),
                num_qubits,
            });
        }
        let dimension = 1usize << num_qubits;
        if amplitudes.len() != dimension {
            return Err(EngineError::DimensionMismatch {
                expected: dimension,
                actual: amplitudes.len(),
            });
        }

        let state = Self::zeroed(num_qubits)?;
        unsafe {
            std::ptr::copy_nonoverlapping(amplitudes.as_ptr(), state.data.as_ptr(), dimension);
        }
        Ok(state)
    }

    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn amplitudes(&self) -> &[Complex64] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.dimension) }
    }

    #[inline]
    pub fn amplitudes_mut(&mut self) -> &mut [Complex64] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.dimension) }
    }

    /// Squared norm of the state
    pub fn norm_sqr(&self) -> f64 {
        self.amplitudes().iter().map(|a| a.norm_sqr()).sum()
    }

    /// Rescale so the squared norm is 1
    ///
    /// A zero vector is left untouched.
    pub fn normalize(&mut self) {
        let norm = self.norm_sqr().sqrt();
        if norm > 0.0 {
            let inv = 1.0 / norm;
            for amp in self.amplitudes_mut() {
                *amp *= inv;
            }
        }
    }

    /// Tensor product with `other`, placing `other`'s qubits above this
    /// vector's qubits
    ///
    /// Returns the offset at which `other`'s qubit 0 lands, i.e. the prior
    /// qubit count of `self`.
    pub fn compose(&mut self, other: &[Complex64], other_qubits: usize) -> Result<usize> {
        let offset = self.num_qubits;
        let mut merged = Self::zeroed(self.num_qubits + other_qubits)?;
        {
            let src = self.amplitudes();
            let dst = merged.amplitudes_mut();
            for (j, &hi) in other.iter().enumerate() {
                if hi == Complex64::new(0.0, 0.0) {
                    continue;
                }
                let base = j << offset;
                for (i, &lo) in src.iter().enumerate() {
                    dst[base | i] = lo * hi;
                }
            }
        }
        *self = merged;
        Ok(offset)
    }

    /// Split out the contiguous qubit range `[start, start + length)`,
    /// assuming it is separable from the remainder
    ///
    /// Returns `(kept, extracted)` amplitude factors, both renormalized. The
    /// factorization pivots on the largest-magnitude amplitude, so the
    /// result is exact for product states and the closest pivoted factor
    /// pair otherwise; callers that need certainty verify with
    /// [`reconstruction_error`](Self::reconstruction_error).
    pub fn factor_range(&self, start: usize, length: usize) -> (Vec<Complex64>, Vec<Complex64>) {
        let amps = self.amplitudes();
        let mid_dim = 1usize << length;
        let rem_dim = self.dimension >> length;
        let low_mask = (1usize << start) - 1;

        // Index split: low bits [0, start), mid bits [start, start+length),
        // high bits above.
        let full_index = |rem: usize, mid: usize| -> usize {
            let low = rem & low_mask;
            let high = rem & !low_mask;
            low | (mid << start) | (high << length)
        };

        let mut pivot = 0usize;
        let mut pivot_norm = 0.0f64;
        for (i, amp) in amps.iter().enumerate() {
            let n = amp.norm_sqr();
            if n > pivot_norm {
                pivot_norm = n;
                pivot = i;
            }
        }

        let pivot_mid = (pivot >> start) & (mid_dim - 1);
        let pivot_rem = (pivot & low_mask) | ((pivot >> length) & !low_mask);

        let mut extracted = vec![Complex64::new(0.0, 0.0); mid_dim];
        for (m, out) in extracted.iter_mut().enumerate() {
            *out = amps[full_index(pivot_rem, m)];
        }

        let mut kept = vec![Complex64::new(0.0, 0.0); rem_dim];
        for (r, out) in kept.iter_mut().enumerate() {
            *out = amps[full_index(r, pivot_mid)];
        }

        normalize_slice(&mut extracted);
        normalize_slice(&mut kept);
        (kept, extracted)
    }

    /// Squared reconstruction error of a candidate factorization of the
    /// qubit range `[start, start + length)`
    pub fn reconstruction_error(
        &self,
        start: usize,
        length: usize,
        kept: &[Complex64],
        extracted: &[Complex64],
    ) -> f64 {
        let amps = self.amplitudes();
        let low_mask = (1usize << start) - 1;
        // Global phase of the product is free; align it on the pivot pair.
        let mut phase = Complex64::new(1.0, 0.0);
        let mut best = 0.0f64;
        for (i, amp) in amps.iter().enumerate() {
            let mid = (i >> start) & ((1 << length) - 1);
            let rem = (i & low_mask) | ((i >> length) & !low_mask);
            let prod = kept[rem] * extracted[mid];
            if prod.norm_sqr() > best {
                best = prod.norm_sqr();
                if prod.norm() > 0.0 {
                    phase = amp / prod;
                }
            }
        }
        let mut err = 0.0f64;
        for (i, amp) in amps.iter().enumerate() {
            let mid = (i >> start) & ((1 << length) - 1);
            let rem = (i & low_mask) | ((i >> length) & !low_mask);
            err += (amp - phase * kept[rem] * extracted[mid]).norm_sqr();
        }
        err
    }

    /// Project the qubit range `[start, start + length)` onto the classical
    /// value `value`, dropping those qubits and renormalizing the remainder
    pub fn project_range(&mut self, start: usize, length: usize, value: u64) -> Result<()> {
        let amps = self.amplitudes();
        let rem_dim = self.dimension >> length;
        let low_mask = (1usize << start) - 1;

        let mut kept = vec![Complex64::new(0.0, 0.0); rem_dim];
        for (r, out) in kept.iter_mut().enumerate() {
            let low = r & low_mask;
            let high = r & !low_mask;
            *out = amps[low | ((value as usize) << start) | (high << length)];
        }
        normalize_slice(&mut kept);

        *self = Self::from_amplitudes(self.num_qubits - length, &kept)?;
        Ok(())
    }

    /// Replace this vector's contents with the given factor amplitudes
    pub fn replace_with(&mut self, num_qubits: usize, amplitudes: &[Complex64]) -> Result<()> {
        *self = Self::from_amplitudes(num_qubits, amplitudes)?;
        Ok(())
    }
}

fn normalize_slice(amps: &mut [Complex64]) {
    let norm: f64 = amps.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
    if norm > 0.0 {
        let inv = 1.0 / norm;
        for a in amps.iter_mut() {
            *a *= inv;
        }
    }
}

impl Clone for StateVector {
    fn clone(&self) -> Self {
        Self::from_amplitudes(self.num_qubits, self.amplitudes())
            .expect("clone of an existing buffer cannot exceed the allocation cap")
    }
}

impl Drop for StateVector {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr() as *mut u8, self.layout);
        }
    }
}

// The buffer is uniquely owned; sharing is by &self only.
unsafe impl Send for StateVector {}
unsafe impl Sync for StateVector {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_initializes_classical_state() {
        let sv = StateVector::new(3, 5).unwrap();
        assert_eq!(sv.dimension(), 8);
        assert_eq!(sv.amplitudes()[5], Complex64::new(1.0, 0.0));
        assert!((sv.norm_sqr() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn oversized_allocation_is_refused() {
        let err = StateVector::new(MAX_QUBITS + 1, 0).unwrap_err();
        assert!(matches!(err, EngineError::AllocationFailure { .. }));
    }

    #[test]
    fn compose_is_tensor_product() {
        let mut a = StateVector::new(1, 1).unwrap(); // |1>
        let b = StateVector::new(2, 0).unwrap(); // |00>
        let offset = a.compose(b.amplitudes(), 2).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(a.num_qubits(), 3);
        // |00>|1> = index 0b001
        assert_eq!(a.amplitudes()[1], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn factor_range_recovers_product_state() {
        // (|0> + |1>)/sqrt(2) on qubit 1, |1> on qubit 0
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let amps = [
            Complex64::new(0.0, 0.0),
            Complex64::new(s, 0.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(s, 0.0),
        ];
        let sv = StateVector::from_amplitudes(2, &amps).unwrap();
        let (kept, extracted) = sv.factor_range(1, 1);
        assert!(sv.reconstruction_error(1, 1, &kept, &extracted) < 1e-12);
        assert!((extracted[0].norm() - s).abs() < 1e-12);
        assert!((kept[1].norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn project_range_drops_known_bits() {
        let sv_amps = [
            Complex64::new(0.0, 0.0),
            Complex64::new(0.6, 0.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(0.8, 0.0),
        ];
        let mut sv = StateVector::from_amplitudes(2, &sv_amps).unwrap();
        // Qubit 0 is |1>; drop it.
        sv.project_range(0, 1, 1).unwrap();
        assert_eq!(sv.num_qubits(), 1);
        assert!((sv.amplitudes()[0].re - 0.6).abs() < 1e-12);
        assert!((sv.amplitudes()[1].re - 0.8).abs() < 1e-12);
    }
}
