use std::io::Write;

use anyhow::{Context, Result};
use epoch_core::{ExecutionContext, VirtualMachine};

use crate::string::render;

/// print(value): writes the value and a newline to stdout.
fn print(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = ctx.pop()?;
    let text = render(ctx, &value)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", text).context("stdout write error")?;
    out.flush().context("stdout flush error")
}

pub(crate) fn register(vm: &mut VirtualMachine) {
    vm.register_library_function("print", print);
}
