//! Integration tests for the lazy entanglement layer
//!
//! These drive the public register API only, the way a circuit-construction
//! caller would, and check both the quantum semantics and the laziness
//! guarantees (through the instrumentation counters).

use num_complex::Complex64;
use sepq_unit::{QubitRegister, RegisterConfig};

const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);
const EPS: f64 = 1e-9;

fn reg(n: usize, seed: u64) -> QubitRegister {
    QubitRegister::new(n, 0, RegisterConfig::seeded(seed))
}

fn bell(seed: u64) -> QubitRegister {
    let mut r = reg(2, seed);
    r.h(0).unwrap();
    r.mc_invert(&[0], ONE, ONE, 1).unwrap();
    r
}

#[test]
fn try_separate_is_idempotent_on_separable_qubits() {
    let mut r = reg(2, 1);
    r.h(0).unwrap();
    let stats_before = r.stats();

    assert!(r.try_separate(0).unwrap());
    assert!(r.try_separate(1).unwrap());

    // No engine was allocated, composed, or split to answer that.
    assert_eq!(r.stats(), stats_before);
    assert!((r.prob(0).unwrap() - 0.5).abs() < EPS);
    assert!(r.prob(1).unwrap() < EPS);
}

#[test]
fn buffered_phase_gates_combine_by_matrix_product() {
    // Two S-like controlled phases deferred on the same edge must flush
    // to exactly one controlled Z.
    let mut twice = reg(2, 2);
    twice.h(0).unwrap();
    twice.h(1).unwrap();
    twice.mc_phase(&[0], ONE, I, 1).unwrap();
    twice.mc_phase(&[0], ONE, I, 1).unwrap();

    let mut direct = reg(2, 3);
    direct.h(0).unwrap();
    direct.h(1).unwrap();
    direct.mc_phase(&[0], ONE, -ONE, 1).unwrap();

    assert!(twice.sum_sqr_diff(&mut direct).unwrap() < EPS);
}

#[test]
fn deferred_gates_are_counted_not_executed() {
    let mut r = reg(2, 4);
    r.h(0).unwrap();
    r.h(1).unwrap();
    r.mc_phase(&[0], ONE, I, 1).unwrap();
    r.mc_phase(&[0], ONE, I, 1).unwrap();

    assert!(r.stats().gates_buffered >= 1);
    assert_eq!(r.stats().compositions, 0);
    assert_eq!(r.stats().engine_allocations, 0);
}

#[test]
fn h_round_trip_restores_amplitudes() {
    let mut r = reg(1, 5);
    r.h(0).unwrap();
    r.h(0).unwrap();
    let amps = r.get_quantum_state().unwrap();
    assert!((amps[0] - ONE).norm() < EPS);
    assert!(amps[1].norm() < EPS);
}

#[test]
fn compose_then_detach_is_the_identity_on_product_states() {
    let mut left = reg(2, 6);
    left.h(0).unwrap();
    left.s(0).unwrap();
    let mut right = reg(2, 7);
    right.x(0).unwrap();
    right.h(1).unwrap();

    let mut left_ref = left.try_clone().unwrap();
    let mut right_ref = right.try_clone().unwrap();

    let start = left.compose(&mut right).unwrap();
    assert_eq!(start, 2);
    assert_eq!(left.qubit_count(), 4);

    let mut detached = left.decompose(2, 2).unwrap();
    assert_eq!(left.qubit_count(), 2);
    assert_eq!(detached.qubit_count(), 2);

    assert!(left.sum_sqr_diff(&mut left_ref).unwrap() < EPS);
    assert!(detached.sum_sqr_diff(&mut right_ref).unwrap() < EPS);
}

#[test]
fn compose_alone_touches_no_engine() {
    let mut left = reg(2, 8);
    left.h(0).unwrap();
    let mut right = reg(2, 9);
    right.h(1).unwrap();

    left.compose(&mut right).unwrap();
    assert_eq!(left.stats().compositions, 0);
}

#[test]
fn bell_pair_is_not_separable() {
    let mut r = bell(10);
    assert!(!r.try_separate_pair(0, 1).unwrap());

    // Still not separable after the buffers were forced real.
    let _ = r.prob(1).unwrap();
    assert!(!r.try_separate_pair(0, 1).unwrap());
}

#[test]
fn unrelated_qubits_are_separable() {
    let mut r = reg(2, 11);
    r.h(0).unwrap();
    r.h(1).unwrap();
    assert!(r.try_separate_pair(0, 1).unwrap());
}

#[test]
fn forced_measurement_fixes_probability_exactly() {
    let mut r = reg(1, 12);
    r.h(0).unwrap();
    assert!(r.force_m(0, true, true, true).unwrap());
    assert_eq!(r.prob(0).unwrap(), 1.0);
}

#[test]
fn end_to_end_bell_scenario() {
    let mut r = bell(13);

    assert!((r.prob_all(0b00).unwrap() - 0.5).abs() < EPS);
    assert!((r.prob_all(0b11).unwrap() - 0.5).abs() < EPS);
    assert!(r.prob_all(0b01).unwrap() < EPS);
    assert!(r.prob_all(0b10).unwrap() < EPS);

    assert!(!r.try_separate_pair(0, 1).unwrap());

    assert!(r.force_m(0, true, true, true).unwrap());
    assert_eq!(r.prob(1).unwrap(), 1.0);
}

#[test]
fn repeated_z_never_materializes_a_unit() {
    let mut r = reg(1, 14);
    r.phase(ONE, -ONE, 0).unwrap();
    r.phase(ONE, -ONE, 0).unwrap();

    assert_eq!(r.stats().compositions, 0);
    assert_eq!(r.stats().engine_allocations, 0);

    let amps = r.get_quantum_state().unwrap();
    assert!((amps[0] - ONE).norm() < EPS);
    assert!(amps[1].norm() < EPS);
}

#[test]
fn lazy_bell_collapse_needs_no_engine_at_all() {
    // H defers into a frame relabel and the CNOT into a buffer; forcing
    // the control's outcome resolves the buffer classically.
    let mut r = bell(15);
    assert!(r.force_m(0, true, true, true).unwrap());
    assert_eq!(r.prob(1).unwrap(), 1.0);
    assert_eq!(r.stats().engine_allocations, 0);
    assert_eq!(r.stats().compositions, 0);
}

#[test]
fn multishot_sampling_shows_bell_correlations_without_collapse() {
    let mut r = bell(16);
    let counts = r.multi_shot_measure_mask(&[1, 2], 2000).unwrap();

    assert_eq!(counts.get(&0b01), None);
    assert_eq!(counts.get(&0b10), None);
    let total: u32 = counts.values().sum();
    assert_eq!(total, 2000);
    let zeros = counts.get(&0b00).copied().unwrap_or(0);
    assert!(zeros > 700 && zeros < 1300, "zeros = {zeros}");

    // Sampling never collapsed anything.
    approx::assert_abs_diff_eq!(r.prob(0).unwrap(), 0.5, epsilon = EPS);
}

#[test]
fn m_all_collapses_to_a_consistent_permutation() {
    let mut r = reg(3, 17);
    r.x(0).unwrap();
    r.x(2).unwrap();
    assert_eq!(r.m_all().unwrap(), 0b101);

    // Measuring a Bell pair yields a correlated permutation.
    let mut b = bell(18);
    let result = b.m_all().unwrap();
    assert!(result == 0b00 || result == 0b11);
    assert_eq!(b.prob_all(result).unwrap(), 1.0);
}

#[test]
fn clone_is_fully_independent() {
    let mut r = bell(19);
    let mut copy = r.try_clone().unwrap();

    let _ = r.m_all().unwrap();
    // The clone's superposition is untouched by the original's collapse.
    assert!((copy.prob(0).unwrap() - 0.5).abs() < EPS);
}

#[test]
fn swap_is_pure_bookkeeping() {
    let mut r = reg(2, 20);
    r.x(0).unwrap();
    r.swap(0, 1).unwrap();

    assert_eq!(r.prob(1).unwrap(), 1.0);
    assert_eq!(r.prob(0).unwrap(), 0.0);
    assert_eq!(r.stats().engine_allocations, 0);
}

#[test]
fn iswap_between_separate_qubits_stays_deferred() {
    let mut r = reg(2, 21);
    r.h(0).unwrap();
    r.iswap(0, 1).unwrap();
    assert_eq!(r.stats().compositions, 0);

    // iSwap |+0> = (|00> + i|01>)/sqrt(2): qubit 1 carries the excitation.
    assert!((r.prob(1).unwrap() - 0.5).abs() < EPS);
    assert!(r.prob(0).unwrap() < EPS);
}

#[test]
fn sum_sqr_diff_distinguishes_and_identifies() {
    let mut a = bell(22);
    let mut b = bell(23);
    assert!(a.sum_sqr_diff(&mut b).unwrap() < EPS);

    let mut c = reg(2, 24);
    c.x(0).unwrap();
    assert!(a.sum_sqr_diff(&mut c).unwrap() > 0.4);

    let mut d = reg(3, 25);
    assert_eq!(a.sum_sqr_diff(&mut d).unwrap(), 1.0);
}

#[test]
fn ghz_separates_after_measurement() {
    let mut r = reg(3, 26);
    r.h(0).unwrap();
    r.mc_invert(&[0], ONE, ONE, 1).unwrap();
    r.mc_invert(&[1], ONE, ONE, 2).unwrap();

    let outcome = r.force_m(1, false, false, true).unwrap();
    // Collapse of the middle qubit pins the other two.
    assert_eq!(r.prob(0).unwrap(), if outcome { 1.0 } else { 0.0 });
    assert_eq!(r.prob(2).unwrap(), if outcome { 1.0 } else { 0.0 });
    assert!(r.try_separate(0).unwrap());
    assert!(r.try_separate(2).unwrap());
}

#[test]
fn out_of_range_indices_are_rejected() {
    let mut r = reg(2, 27);
    assert!(r.h(2).is_err());
    assert!(r.prob(5).is_err());
    assert!(r.mc_invert(&[0], ONE, ONE, 3).is_err());
    assert!(r.mc_invert(&[4], ONE, ONE, 0).is_err());
}

#[test]
fn set_and_get_quantum_state_round_trip() {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let amps = vec![
        Complex64::new(s, 0.0),
        Complex64::default(),
        Complex64::default(),
        Complex64::new(0.0, s),
    ];
    let mut r = reg(2, 28);
    r.set_quantum_state(&amps).unwrap();

    let out = r.get_quantum_state().unwrap();
    for (a, b) in amps.iter().zip(out.iter()) {
        assert!((a - b).norm() < EPS);
    }
    assert!(!r.try_separate_pair(0, 1).unwrap());
}
