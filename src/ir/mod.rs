//! Arena-based IR: values, instructions, blocks, functions, globals.
//!
//! The front end builds a [`Module`] through the construction methods and
//! hands it to [`crate::pipeline::compile`]; every pass mutates it in
//! place. See [`module`] for the data model and its invariants.

pub mod module;
pub mod print;
pub mod types;

pub use module::{
    BinOp, BlockData, BlockId, Builtin, CastOp, CmpOp, FuncId, FunctionData, GlobalData,
    GlobalId, GlobalInit, InstData, Loc, Module, Op, PhysReg, ValueData, ValueId, ValueKind,
};
pub use types::Type;
