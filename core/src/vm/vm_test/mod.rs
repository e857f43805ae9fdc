use std::cell::RefCell;
use std::sync::Arc;

pub(super) use anyhow::Result;

pub(super) use super::*;
pub(super) use crate::bytecode::{BytecodeWriter, ParamPattern, TypeParam};
pub(super) use crate::config::VmConfig;
pub(super) use crate::error::{ExecutionOutcome, ExecutionResult, HaltReason};
pub(super) use crate::types::{TypeId, VariableOrigin};
pub(super) use crate::value::Value;

pub(super) const IF: u32 = 0x101;
pub(super) const ELSEIF: u32 = 0x102;
pub(super) const ELSE: u32 = 0x103;
pub(super) const WHILE: u32 = 0x104;

thread_local! {
    static RECORDED: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
}

pub(super) fn take_recorded() -> Vec<Value> {
    RECORDED.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

fn record(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = ctx.pop()?;
    RECORDED.with(|r| r.borrow_mut().push(value));
    Ok(())
}

fn binary(ctx: &mut ExecutionContext<'_>, op: fn(i32, i32) -> Value) -> Result<()> {
    let b = ctx.pop()?.unwrap_sum().as_integer()?;
    let a = ctx.pop()?.unwrap_sum().as_integer()?;
    ctx.push(op(a, b))
}

fn add(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    binary(ctx, |a, b| Value::Integer(a + b))
}

fn sub(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    binary(ctx, |a, b| Value::Integer(a - b))
}

fn mul(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    binary(ctx, |a, b| Value::Integer(a * b))
}

fn lt(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    binary(ctx, |a, b| Value::Boolean(a < b))
}

fn branch(ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(if ctx.pop()?.as_boolean()? {
        ControlOutcome::ExecuteCurrentLink
    } else {
        ControlOutcome::PassToNextLink
    })
}

fn otherwise(_ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(ControlOutcome::ExecuteCurrentLink)
}

fn repeat_while(ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(if ctx.pop()?.as_boolean()? {
        ControlOutcome::ExecuteAndRepeatChain
    } else {
        ControlOutcome::ExitChain
    })
}

/// Machine with `add`, `sub`, `mul`, `lt` and `record` library functions and
/// if/elseif/else/while controllers.
pub(super) fn machine_with(config: VmConfig) -> VirtualMachine {
    let mut vm = VirtualMachine::new(config);
    let library: [(&str, LibraryFunction); 5] = [("add", add), ("sub", sub), ("mul", mul), ("lt", lt), ("record", record)];
    for (name, function) in library {
        vm.register_library_function(name, function);
    }
    vm.register_entity_controller(IF, Arc::new(branch)).unwrap();
    vm.register_entity_controller(ELSEIF, Arc::new(branch)).unwrap();
    vm.register_entity_controller(ELSE, Arc::new(otherwise)).unwrap();
    vm.register_entity_controller(WHILE, Arc::new(repeat_while)).unwrap();
    vm
}

pub(super) fn machine() -> VirtualMachine {
    machine_with(VmConfig::default())
}

pub(super) fn run(vm: &VirtualMachine, w: BytecodeWriter) -> ExecutionOutcome {
    vm.execute_bytecode(&w.finish().unwrap()).unwrap()
}

pub(super) fn local(name: &str, type_id: TypeId) -> (&str, TypeId, VariableOrigin, bool) {
    (name, type_id, VariableOrigin::Local, false)
}

pub(super) fn param(name: &str, type_id: TypeId) -> (&str, TypeId, VariableOrigin, bool) {
    (name, type_id, VariableOrigin::Parameter, false)
}

pub(super) fn returns(name: &str, type_id: TypeId) -> (&str, TypeId, VariableOrigin, bool) {
    (name, type_id, VariableOrigin::Return, false)
}

pub(super) fn text(vm: &VirtualMachine, value: &Value) -> String {
    vm.strings().get(value.as_string_handle().unwrap()).unwrap().to_string()
}

mod calls;
mod control_flow;
mod dispatch;
mod end_to_end;
mod gc;
mod references;
mod structures;
