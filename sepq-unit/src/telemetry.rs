//! Register instrumentation counters

/// Counters for the register's interactions with backing engines
///
/// The whole point of this layer is what it avoids doing, so the counters
/// record the events worth minimizing. `compositions` staying at zero over
/// a run certifies that no joint register was ever materialized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterStats {
    /// Backing registers allocated
    pub engine_allocations: u64,

    /// Unit-merge operations executed by the Entangler
    pub compositions: u64,

    /// Qubits detached back out of a unit
    pub separations: u64,

    /// Two-qubit gates absorbed into the phase buffer graph
    pub gates_buffered: u64,

    /// Buffered gates flushed to a backing engine
    pub buffers_flushed: u64,
}

impl std::fmt::Display for RegisterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "allocs {} / compose {} / separate {} / buffered {} / flushed {}",
            self.engine_allocations,
            self.compositions,
            self.separations,
            self.gates_buffered,
            self.buffers_flushed
        )
    }
}
