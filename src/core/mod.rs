//! Core infrastructure shared by every pass.
//!
//! # Key components
//!
//! ## Errors (`error`)
//! - `CompileError` / `CompileResult` for fail-fast invariant violations
//! - Every variant carries the function/block/value context of the failure
//!
//! ## Naming (`naming`)
//! - `NameSupply`, the explicit per-module source of synthesized names

pub mod error;
pub mod naming;

pub use error::{CompileError, CompileResult};
pub use naming::NameSupply;
