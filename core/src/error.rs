//! Run outcomes.
//!
//! Fatal conditions (malformed bytecode, unresolved names, invalid handles)
//! travel as `anyhow::Error`. Conditions the embedder can recover from stop
//! the run with a [`HaltReason`] instead.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A `Halt` instruction.
    Explicit,
    /// A parameter or return type the native call path cannot convert.
    UnsupportedMarshalType(String),
    /// A library or exported symbol could not be resolved.
    LibraryResolution(String),
    /// No pattern or type candidate accepted the arguments.
    DispatchExhausted(String),
    /// A panic escaped native or library code.
    NativeFault(String),
    /// A callback invoked from native code failed.
    CallbackFailure(String),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Explicit => f.write_str("halt instruction"),
            HaltReason::UnsupportedMarshalType(detail) => write!(f, "unsupported marshaling type: {}", detail),
            HaltReason::LibraryResolution(detail) => write!(f, "library resolution failed: {}", detail),
            HaltReason::DispatchExhausted(detail) => write!(f, "no dispatch candidate matched: {}", detail),
            HaltReason::NativeFault(detail) => write!(f, "native fault: {}", detail),
            HaltReason::CallbackFailure(detail) => write!(f, "callback failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Ok,
    Halted(HaltReason),
}

impl ExecutionResult {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionResult::Ok)
    }
}

/// What a completed run hands back to the embedder.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    /// Value left in the Register when the run stopped.
    pub return_value: Option<Value>,
}
