//! minic - SSA middle end and MIPS back end for a small C-like language.
//!
//! The front end hands over a [`ir::Module`]; the pipeline promotes
//! memory to SSA, optimizes, allocates registers, destroys SSA and emits
//! simulator-ready MIPS assembly.
//!
//! # Primary Usage
//!
//! ```ignore
//! use minic::{ir::Module, pipeline};
//!
//! let mut module = Module::new();
//! // ... front end builds functions into the module ...
//! let program = pipeline::compile(&mut module)?;
//! println!("{program}");
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Arena-based IR: values, instructions, blocks, functions
//! - [`analysis`] - CFG, dominance and liveness
//! - [`ssa`] - SSA construction (mem2reg) and destruction
//! - [`opt`] - DCE, value numbering, global code motion
//! - [`regalloc`] - Dominator-tree linear scan
//! - [`mips`] - Frame layout, selection, textual emission
//! - [`core`] - Shared infrastructure (errors, name supply)

pub mod analysis;
pub mod core;
pub mod ir;
pub mod mips;
pub mod opt;
pub mod pipeline;
pub mod regalloc;
pub mod ssa;

pub use crate::core::{CompileError, CompileResult, NameSupply};
pub use ir::Module;
pub use mips::TargetProgram;
pub use pipeline::compile;
