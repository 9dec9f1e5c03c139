//! Configuration (C7).

/// Compile-time bound on the number of replicas a single handle can fan out
/// to. The reference mirrorfs implementation uses 10; there is nothing
/// magic about the number beyond "small and generous."
pub const MAX_REPLICAS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Abort the process on a scalar/errno divergence between replicas.
    /// Payload divergences (read/readlink bytes, readdir entry names) abort
    /// unconditionally regardless of this flag; see `equivalence`.
    pub abort_on_difference: bool,
    /// Log one line per dispatched operation to stderr.
    pub log_operations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            abort_on_difference: true,
            log_operations: false,
        }
    }
}
