//! The interpreter.
//!
//! [`VirtualMachine`] owns the shared heaps and every registry the embedder
//! fills in; [`ExecutionContext`] runs one loaded program against it.

mod context;
mod dispatch;
mod entity;
mod exec;
mod jit;
mod machine;
mod records;

pub use context::{ExecutionContext, NestedOutcome};
pub use entity::{ControlOutcome, EntityController, tags};
pub use jit::{JitBackend, NativeEntryPoint};
pub use machine::{LibraryFunction, VirtualMachine};

pub(crate) use exec::Flow;
pub(crate) use machine::panic_message;

#[cfg(test)]
mod vm_test;
