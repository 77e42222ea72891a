//! MIPS backend: register conventions, frame layout, instruction
//! selection and textual emission.

pub mod emit;
pub mod frame;
pub mod lower;
pub mod regs;

pub use emit::{DataItem, MachInst, MachOp, MachOperand, TargetFunction, TargetProgram};
pub use frame::FrameLayout;
pub use lower::lower_module;
