//! Built-in library functions and meta-controls for the Epoch VM.
//!
//! Library functions take their operands from the stack and push at most
//! one result; see each module for the names it registers.

pub mod arith;
pub mod buffer;
pub mod compare;
pub mod control;
pub mod io;
pub mod string;

#[cfg(test)]
mod control_test;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use epoch_core::VirtualMachine;
use tracing::debug;

pub use control::{ELSE, ELSEIF, IF, WHILE};

/// Registers every built-in library function and the standard
/// if/elseif/else/while controllers.
pub fn register_stdlib(vm: &mut VirtualMachine) -> Result<()> {
    arith::register(vm);
    compare::register(vm);
    string::register(vm);
    buffer::register(vm);
    io::register(vm);
    control::register(vm)?;
    debug!(target: "epoch::stdlib", "standard library registered");
    Ok(())
}
