use anyhow::{Result, ensure};
use epoch_core::{ExecutionContext, Value, VirtualMachine};

/// Upper bound for a single `buffer` request.
pub const MAX_BUFFER_LEN: usize = 64 << 20;

fn allocate(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let requested = ctx.pop()?.unwrap_sum().as_integer()?;
    ensure!(requested >= 0, "buffer: negative length {}", requested);
    let len = requested as usize;
    ensure!(len <= MAX_BUFFER_LEN, "buffer: {} bytes exceeds the {} byte limit", len, MAX_BUFFER_LEN);
    let handle = ctx.buffers().allocate(len)?;
    ctx.push(Value::Buffer(handle))
}

fn buffer_length(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let handle = ctx.pop()?.unwrap_sum().as_buffer()?;
    let len = ctx.buffers().get(handle)?.len();
    ctx.push(Value::Integer(len as i32))
}

pub(crate) fn register(vm: &mut VirtualMachine) {
    vm.register_library_function("buffer", allocate);
    vm.register_library_function("buffer_length", buffer_length);
}
