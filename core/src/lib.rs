//! Epoch virtual machine core.
//!
//! Loads Epoch bytecode into a [`Program`], runs it on a
//! [`VirtualMachine`] and bridges calls into native libraries.

pub mod bytecode;
pub mod config;
pub mod error;
pub mod frame;
pub mod heap;
pub mod marshal;
pub mod types;
pub mod util;
pub mod value;
pub mod vm;


pub use bytecode::{BytecodeWriter, Program};
pub use config::VmConfig;
pub use error::{ExecutionOutcome, ExecutionResult, HaltReason};
pub use types::TypeId;
pub use value::Value;
pub use vm::{ControlOutcome, ExecutionContext, VirtualMachine, tags};
