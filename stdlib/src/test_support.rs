use anyhow::Result;
use epoch_core::types::VariableOrigin;
use epoch_core::{BytecodeWriter, ExecutionOutcome, TypeId, Value, VirtualMachine, VmConfig, tags};

use crate::register_stdlib;

pub fn machine() -> VirtualMachine {
    let mut vm = VirtualMachine::new(VmConfig::default());
    register_stdlib(&mut vm).unwrap();
    vm
}

/// Program computing `out = <body>`; `body` leaves exactly one value.
pub fn assignment(out_type: TypeId, body: impl FnOnce(&mut BytecodeWriter)) -> Vec<u8> {
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[("out", out_type, VariableOrigin::Local, false)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out");
    body(&mut w);
    w.assign().set_return("out");
    w.end_entity();
    w.finish().unwrap()
}

/// Runs the assignment on a fresh machine.
pub fn evaluate(out_type: TypeId, body: impl FnOnce(&mut BytecodeWriter)) -> Result<(VirtualMachine, ExecutionOutcome)> {
    let vm = machine();
    let outcome = vm.execute_bytecode(&assignment(out_type, body))?;
    Ok((vm, outcome))
}

pub fn evaluate_value(out_type: TypeId, body: impl FnOnce(&mut BytecodeWriter)) -> Result<Value> {
    let (_, outcome) = evaluate(out_type, body)?;
    Ok(outcome.return_value.unwrap_or_default())
}

pub fn evaluate_text(body: impl FnOnce(&mut BytecodeWriter)) -> Result<String> {
    let (vm, outcome) = evaluate(TypeId::STRING, body)?;
    let handle = outcome.return_value.unwrap_or_default().as_string_handle()?;
    Ok(vm.strings().get(handle)?.to_string())
}
