//! Runtime error taxonomy for the dispatch loop.
//!
//! Message wording is taken verbatim from the original `vm.c`'s
//! `runtimeError` call sites, including the inconsistent trailing-period
//! punctuation between sibling messages (that inconsistency is in the
//! source, not a typo introduced here).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,

    #[error("Operands must be two numbers or two strings")]
    OperandsMustBeTwoNumbersOrStrings,

    #[error("Operand must be a number")]
    OperandMustBeANumber,

    #[error("Undefined variable '{0}'")]
    UndefinedVariableRead(String),

    #[error("Undefined variable '{0}'.")]
    UndefinedVariableWrite(String),

    #[error("Can only call functions and classes.")]
    NotCallable,

    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: i32, got: usize },

    #[error("Stack overflow.")]
    FrameOverflow,

    #[error("Invalid type to index into.")]
    IndexTargetNotAList,

    #[error("Cannot store value in a non-list.")]
    StoreTargetNotAList,

    #[error("List index is not a number.")]
    IndexNotANumber,

    #[error("List index out of range.")]
    IndexOutOfRange,

    #[error("Invalid list index.")]
    InvalidStoreIndex,

    #[error("Native error: {0}")]
    Native(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
}

pub type VmResult<T> = Result<T, VmError>;
