//! Error types for the minic backend.
//!
//! Using thiserror for more idiomatic error handling.
//!
//! Every error here is an internal invariant violation: source-level problems
//! are caught by the front end before a [`crate::ir::Module`] ever reaches
//! this crate. An error therefore names the function, block or value where
//! the pipeline broke, and compilation of the unit stops immediately.

use thiserror::Error;

/// Main error type for the middle-end and back-end pipeline.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("block {block} in function {func} has no terminator")]
    MissingTerminator { func: String, block: String },

    #[error("terminator {value} is not the last instruction of block {block} in function {func}")]
    MisplacedTerminator {
        func: String,
        block: String,
        value: String,
    },

    #[error("value {value} in function {func} is read but was never assigned a register or stack slot")]
    UnassignedValue { func: String, value: String },

    #[error("phi {value} in block {block} of function {func} has no incoming value for predecessor {pred}")]
    MissingPhiOperand {
        func: String,
        block: String,
        value: String,
        pred: String,
    },

    #[error("instruction {value} in function {func}: earliest block {earliest} does not lie on the dominator path from latest block {latest}")]
    BrokenSchedule {
        func: String,
        value: String,
        earliest: String,
        latest: String,
    },

    #[error("parallel copy on edge into {block} of function {func} could not be serialized")]
    CopySerialization { func: String, block: String },

    #[error("unexpected {what} instruction {value} survived to lowering in function {func}")]
    UnloweredPseudo {
        func: String,
        value: String,
        what: &'static str,
    },
}

/// Result type alias for pipeline operations.
pub type CompileResult<T> = Result<T, CompileError>;
