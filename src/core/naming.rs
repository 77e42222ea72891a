//! Per-module naming context.
//!
//! Passes that synthesize values or blocks (phi insertion, edge splitting,
//! copy cycle breaking) draw fresh names from here instead of from hidden
//! global counters. One supply lives in each [`crate::ir::Module`].

/// Monotonic supply of unique names within one module.
#[derive(Debug, Default, Clone)]
pub struct NameSupply {
    next: u32,
}

impl NameSupply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh name with the given prefix, e.g. `phi.3` or `split.7`.
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.next;
        self.next += 1;
        format!("{prefix}.{n}")
    }
}
