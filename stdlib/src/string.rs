use anyhow::{Result, bail};
use epoch_core::{ExecutionContext, Value, VirtualMachine};

/// Text form of a value as `print` and `cast_string` show it.
pub(crate) fn render(ctx: &ExecutionContext<'_>, value: &Value) -> Result<String> {
    Ok(match value {
        Value::Nothing => String::new(),
        Value::Integer(n) => n.to_string(),
        Value::Integer16(n) => n.to_string(),
        Value::Integer64(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Real(r) => r.to_string(),
        Value::String(handle) if handle.is_none() => String::new(),
        Value::String(handle) | Value::Identifier(handle) | Value::Function(handle) => {
            ctx.string(*handle)?.to_string()
        }
        Value::Buffer(handle) => {
            let buffers = ctx.buffers();
            String::from_utf8_lossy(buffers.get(*handle)?).into_owned()
        }
        Value::Sum(sum) => render(ctx, &sum.payload)?,
        other => bail!("cannot render a {} value", other.type_id()),
    })
}

fn pop_text(ctx: &mut ExecutionContext<'_>, op: &str) -> Result<String> {
    match ctx.pop()?.unwrap_sum() {
        Value::String(handle) if handle.is_none() => Ok(String::new()),
        Value::String(handle) => Ok(ctx.string(handle)?.to_string()),
        other => bail!("{}: expected a string, found {}", op, other.type_id()),
    }
}

fn concat(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let right = pop_text(ctx, ";")?;
    let left = pop_text(ctx, ";")?;
    let joined = ctx.pool_string(&(left + &right))?;
    ctx.push(Value::String(joined))
}

fn length(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let text = pop_text(ctx, "length")?;
    ctx.push(Value::Integer(text.chars().count() as i32))
}

fn cast_string(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = ctx.pop()?;
    let text = render(ctx, &value)?;
    let handle = ctx.pool_string(&text)?;
    ctx.push(Value::String(handle))
}

pub(crate) fn register(vm: &mut VirtualMachine) {
    vm.register_library_function(";", concat);
    vm.register_library_function("length", length);
    vm.register_library_function("cast_string", cast_string);
}
