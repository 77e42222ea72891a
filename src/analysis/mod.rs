//! Function-level analyses: control flow, dominance, liveness.

pub mod cfg;
pub mod liveness;
