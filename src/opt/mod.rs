//! Machine-independent optimizations over SSA form.

pub mod dce;
pub mod gcm;
pub mod gvn;
