//! Benchmarks for the separator and the deferral machinery
//!
//! The interesting comparison is lazy versus forced: the same circuit with
//! gates left in the buffer graph against one where every probability read
//! forces the entangled representation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use num_complex::Complex64;
use sepq_unit::{QubitRegister, RegisterConfig};

const ONE: Complex64 = Complex64::new(1.0, 0.0);

fn bench_lazy_phase_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("lazy_phase_layers");
    for &n in &[4usize, 8, 12] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut reg = QubitRegister::new(n, 0, RegisterConfig::seeded(7));
                for q in 0..n {
                    reg.h(q).unwrap();
                }
                for layer in 0..4 {
                    for q in 0..n - 1 {
                        let target = (q + 1 + layer) % n;
                        if target != q {
                            reg.mc_phase(&[q], ONE, -ONE, target).unwrap();
                        }
                    }
                }
                black_box(reg.stats())
            })
        });
    }
    group.finish();
}

fn bench_separator_on_bell_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("separator_bell_chain");
    for &n in &[4usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut reg = QubitRegister::new(n, 0, RegisterConfig::seeded(11));
                reg.h(0).unwrap();
                for q in 0..n - 1 {
                    reg.mc_invert(&[q], ONE, ONE, q + 1).unwrap();
                }
                // Force the chain real, then collapse and let the
                // separator tear it back down.
                let _ = reg.prob(n - 1).unwrap();
                let _ = reg.force_m(0, false, false, true).unwrap();
                black_box(reg.stats())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lazy_phase_layers, bench_separator_on_bell_chain);
criterion_main!(benches);
