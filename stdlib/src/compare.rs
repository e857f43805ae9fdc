use anyhow::{Result, bail};
use epoch_core::{ExecutionContext, Value, VirtualMachine};

use crate::arith::{NumericPair, pop_numeric_pair};

/// Value equality. Strings compare by content, everything else by value.
fn values_equal(ctx: &ExecutionContext<'_>, left: &Value, right: &Value) -> Result<bool> {
    Ok(match (left, right) {
        (Value::String(a), Value::String(b)) => a == b || ctx.string(*a)? == ctx.string(*b)?,
        (a, b) if a.type_id() != b.type_id() => {
            bail!("cannot compare {} with {}", a.type_id(), b.type_id())
        }
        (a, b) => a == b,
    })
}

fn equal(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let right = ctx.pop()?.unwrap_sum();
    let left = ctx.pop()?.unwrap_sum();
    let same = values_equal(ctx, &left, &right)?;
    ctx.push(Value::Boolean(same))
}

fn not_equal(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let right = ctx.pop()?.unwrap_sum();
    let left = ctx.pop()?.unwrap_sum();
    let same = values_equal(ctx, &left, &right)?;
    ctx.push(Value::Boolean(!same))
}

fn ordering(ctx: &mut ExecutionContext<'_>, op: &str) -> Result<std::cmp::Ordering> {
    let ordering = match pop_numeric_pair(ctx, op)? {
        NumericPair::Integer(a, b) => a.cmp(&b),
        NumericPair::Integer16(a, b) => a.cmp(&b),
        NumericPair::Integer64(a, b) => a.cmp(&b),
        NumericPair::Real(a, b) => match a.partial_cmp(&b) {
            Some(ordering) => ordering,
            None => bail!("{}: NaN operand", op),
        },
    };
    Ok(ordering)
}

fn less(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let result = ordering(ctx, "<")?.is_lt();
    ctx.push(Value::Boolean(result))
}

fn greater(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let result = ordering(ctx, ">")?.is_gt();
    ctx.push(Value::Boolean(result))
}

fn less_equal(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let result = ordering(ctx, "<=")?.is_le();
    ctx.push(Value::Boolean(result))
}

fn greater_equal(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let result = ordering(ctx, ">=")?.is_ge();
    ctx.push(Value::Boolean(result))
}

fn pop_bool_pair(ctx: &mut ExecutionContext<'_>) -> Result<(bool, bool)> {
    let right = ctx.pop()?.unwrap_sum().as_boolean()?;
    let left = ctx.pop()?.unwrap_sum().as_boolean()?;
    Ok((left, right))
}

fn and(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let (a, b) = pop_bool_pair(ctx)?;
    ctx.push(Value::Boolean(a && b))
}

fn or(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let (a, b) = pop_bool_pair(ctx)?;
    ctx.push(Value::Boolean(a || b))
}

fn not(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = ctx.pop()?.unwrap_sum().as_boolean()?;
    ctx.push(Value::Boolean(!value))
}

pub(crate) fn register(vm: &mut VirtualMachine) {
    vm.register_library_function("==", equal);
    vm.register_library_function("!=", not_equal);
    vm.register_library_function("<", less);
    vm.register_library_function(">", greater);
    vm.register_library_function("<=", less_equal);
    vm.register_library_function(">=", greater_equal);
    vm.register_library_function("&&", and);
    vm.register_library_function("||", or);
    vm.register_library_function("!", not);
}
