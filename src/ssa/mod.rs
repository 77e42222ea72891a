//! SSA construction and destruction.

pub mod construct;
pub mod destruct;
