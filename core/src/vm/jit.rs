use std::sync::Arc;

use anyhow::Result;

use crate::bytecode::Instruction;
use crate::frame::StackSpace;

/// Natively compiled function. It consumes its arguments from the operand
/// stack and pushes its result, exactly like the interpreted body would.
pub type NativeEntryPoint = Arc<dyn Fn(&mut StackSpace) -> Result<()> + Send + Sync>;

/// External native code generator.
///
/// The loader submits every function tagged `native`; returning `None`
/// leaves the function interpreted.
pub trait JitBackend: Send + Sync {
    fn compile(&self, code: &[Instruction], begin: usize, end: usize, name: &str) -> Option<NativeEntryPoint>;

    /// Wraps a raw native function pointer so it can be called like a
    /// compiled Epoch function.
    fn compile_callback_wrapper(&self, _native: usize) -> Option<NativeEntryPoint> {
        None
    }
}
