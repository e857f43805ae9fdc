use anyhow::{Result, bail};
use epoch_core::{ExecutionContext, Value, VirtualMachine};

/// Two operands of the same numeric kind.
pub(crate) enum NumericPair {
    Integer(i32, i32),
    Integer16(i16, i16),
    Integer64(i64, i64),
    Real(f32, f32),
}

/// Pops the right then the left operand of a binary operator.
pub(crate) fn pop_numeric_pair(ctx: &mut ExecutionContext<'_>, op: &str) -> Result<NumericPair> {
    let right = ctx.pop()?.unwrap_sum();
    let left = ctx.pop()?.unwrap_sum();
    Ok(match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => NumericPair::Integer(a, b),
        (Value::Integer16(a), Value::Integer16(b)) => NumericPair::Integer16(a, b),
        (Value::Integer64(a), Value::Integer64(b)) => NumericPair::Integer64(a, b),
        (Value::Real(a), Value::Real(b)) => NumericPair::Real(a, b),
        (a, b) => bail!("{}: cannot combine {} and {}", op, a.type_id(), b.type_id()),
    })
}

fn add(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = match pop_numeric_pair(ctx, "+")? {
        NumericPair::Integer(a, b) => Value::Integer(a.wrapping_add(b)),
        NumericPair::Integer16(a, b) => Value::Integer16(a.wrapping_add(b)),
        NumericPair::Integer64(a, b) => Value::Integer64(a.wrapping_add(b)),
        NumericPair::Real(a, b) => Value::Real(a + b),
    };
    ctx.push(value)
}

fn subtract(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = match pop_numeric_pair(ctx, "-")? {
        NumericPair::Integer(a, b) => Value::Integer(a.wrapping_sub(b)),
        NumericPair::Integer16(a, b) => Value::Integer16(a.wrapping_sub(b)),
        NumericPair::Integer64(a, b) => Value::Integer64(a.wrapping_sub(b)),
        NumericPair::Real(a, b) => Value::Real(a - b),
    };
    ctx.push(value)
}

fn multiply(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = match pop_numeric_pair(ctx, "*")? {
        NumericPair::Integer(a, b) => Value::Integer(a.wrapping_mul(b)),
        NumericPair::Integer16(a, b) => Value::Integer16(a.wrapping_mul(b)),
        NumericPair::Integer64(a, b) => Value::Integer64(a.wrapping_mul(b)),
        NumericPair::Real(a, b) => Value::Real(a * b),
    };
    ctx.push(value)
}

fn divide(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = match pop_numeric_pair(ctx, "/")? {
        NumericPair::Integer(_, 0) | NumericPair::Integer16(_, 0) | NumericPair::Integer64(_, 0) => {
            bail!("integer division by zero")
        }
        NumericPair::Integer(a, b) => Value::Integer(a.wrapping_div(b)),
        NumericPair::Integer16(a, b) => Value::Integer16(a.wrapping_div(b)),
        NumericPair::Integer64(a, b) => Value::Integer64(a.wrapping_div(b)),
        NumericPair::Real(a, b) => Value::Real(a / b),
    };
    ctx.push(value)
}

fn negate(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = match ctx.pop()?.unwrap_sum() {
        Value::Integer(a) => Value::Integer(a.wrapping_neg()),
        Value::Integer16(a) => Value::Integer16(a.wrapping_neg()),
        Value::Integer64(a) => Value::Integer64(a.wrapping_neg()),
        Value::Real(a) => Value::Real(-a),
        other => bail!("neg: {} is not numeric", other.type_id()),
    };
    ctx.push(value)
}

pub(crate) fn register(vm: &mut VirtualMachine) {
    vm.register_library_function("+", add);
    vm.register_library_function("-", subtract);
    vm.register_library_function("*", multiply);
    vm.register_library_function("/", divide);
    vm.register_library_function("neg", negate);
}
