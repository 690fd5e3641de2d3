//! Register configuration

use sepq_engine::EngineKind;

/// Separability acceptance boundary: a probed Bloch-vector length `r`
/// qualifies a qubit as separable iff `1 − r <= threshold` and
/// `r <= 1 + threshold`, **boundary inclusive**.
pub const DEFAULT_SEPARABILITY_THRESHOLD: f64 = 1e-8;

/// Configuration for a [`QubitRegister`](crate::QubitRegister)
#[derive(Debug, Clone)]
pub struct RegisterConfig {
    /// Backing-engine implementation allocated for new units
    ///
    /// Default: [`EngineKind::DenseCpu`]
    pub engine: EngineKind,

    /// Threshold for the separability probe acceptance boundary
    ///
    /// See [`DEFAULT_SEPARABILITY_THRESHOLD`] for the exact policy.
    pub separability_threshold: f64,

    /// Attempt to separate qubits immediately after every joint operation
    ///
    /// Keeping this on is what bounds unit growth between measurements.
    /// Default: true
    pub reactive_separate: bool,

    /// Measurement RNG seed; `None` seeds from entropy
    ///
    /// Engine-level RNGs are derived from this seed, so a fixed seed makes
    /// whole-register runs reproducible.
    pub seed: Option<u64>,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::DenseCpu,
            separability_threshold: DEFAULT_SEPARABILITY_THRESHOLD,
            reactive_separate: true,
            seed: None,
        }
    }
}

impl RegisterConfig {
    /// Configuration with a fixed RNG seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}
