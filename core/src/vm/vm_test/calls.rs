use super::*;

fn define_fact(w: &mut BytecodeWriter) {
    w.define_scope("fact", None, &[param("n", TypeId::INTEGER), returns("r", TypeId::INTEGER)]);
    w.begin_entity(tags::FUNCTION, "fact");
    w.begin_chain();
    w.read("n").push_int(2).invoke_meta("lt");
    w.begin_entity(IF, "base").read_ref("r").push_int(1).assign().end_entity();
    w.begin_entity(ELSE, "step");
    w.read_ref("r").read("n");
    w.read("n").push_int(1).invoke_meta("sub").invoke("fact");
    w.invoke_meta("mul").assign();
    w.end_entity();
    w.end_chain();
    w.set_return("r");
    w.end_entity();
}

#[test]
fn recursive_function_returns_through_the_register() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_fact(&mut w);
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_int(5).invoke("fact").assign();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(120)));
}

#[test]
fn calls_restore_the_callers_register() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_fact(&mut w);
    w.define_scope("globals", None, &[local("keep", TypeId::INTEGER), local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("keep").push_int(77).assign().set_return("keep");
    w.read_ref("out").push_int(3).invoke("fact").assign();
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(77)));
}

#[test]
fn reference_parameters_write_through_to_the_caller() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("bump", None, &[("x", TypeId::INTEGER, VariableOrigin::Parameter, true)]);
    w.begin_entity(tags::FUNCTION, "bump");
    w.read_ref("x").read("x").push_int(1).invoke_meta("add").assign();
    w.end_entity();
    w.define_scope("globals", None, &[local("counter", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("counter").push_int(10).assign();
    w.read_ref("counter").invoke("bump");
    w.read_ref("counter").invoke("bump");
    w.set_return("counter");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(12)));
}

#[test]
fn reference_parameter_rejects_plain_values() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("bump", None, &[("x", TypeId::INTEGER, VariableOrigin::Parameter, true)]);
    w.begin_entity(tags::FUNCTION, "bump").end_entity();
    w.push_int(1).invoke("bump");
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("expects a reference"));
}

#[test]
fn read_param_and_indirect_calls() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope(
        "second",
        None,
        &[param("a", TypeId::INTEGER), param("b", TypeId::INTEGER), returns("r", TypeId::INTEGER)],
    );
    w.begin_entity(tags::FUNCTION, "second");
    w.read_ref("r").emit(crate::bytecode::Instruction::ReadParam(1)).assign();
    w.set_return("r");
    w.end_entity();
    w.define_scope("globals", None, &[local("f", TypeId::FUNCTION), local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("f").push_function("second").assign();
    w.read_ref("out").push_int(1).push_int(2).invoke_indirect("f").assign();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(2)));
}

fn call_with_four(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let callee = ctx.pop()?.as_string_handle()?;
    let outcome = ctx.invoke_function(callee, vec![Value::Integer(4)])?;
    ctx.push(outcome.value.unwrap_or_default())
}

#[test]
fn library_functions_can_invoke_bytecode() {
    let mut vm = machine();
    vm.register_library_function("call_with_four", call_with_four);
    let mut w = BytecodeWriter::new();
    w.define_scope("square", None, &[param("x", TypeId::INTEGER), returns("r", TypeId::INTEGER)]);
    w.begin_entity(tags::FUNCTION, "square");
    w.read_ref("r").read("x").read("x").invoke_meta("mul").assign();
    w.set_return("r");
    w.end_entity();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_function("square").invoke_meta("call_with_four").assign();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(16)));
}

fn explode(_ctx: &mut ExecutionContext<'_>) -> Result<()> {
    panic!("library blew up");
}

#[test]
fn panics_in_library_code_become_native_faults() {
    let mut vm = machine();
    vm.register_library_function("explode", explode);
    let mut w = BytecodeWriter::new();
    w.invoke_meta("explode");
    let outcome = run(&vm, w);
    assert_eq!(
        outcome.result,
        ExecutionResult::Halted(HaltReason::NativeFault("library blew up".to_string()))
    );
}

fn stop(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    ctx.request_halt(HaltReason::Explicit);
    Ok(())
}

#[test]
fn halts_requested_inside_nested_invocations_reach_the_outer_run() {
    let mut vm = machine();
    vm.register_library_function("call_with_four", call_with_four);
    let mut w = BytecodeWriter::new();
    w.define_scope("halts", None, &[param("x", TypeId::INTEGER)]);
    w.begin_entity(tags::FUNCTION, "halts");
    w.halt();
    w.end_entity();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.push_function("halts").invoke_meta("call_with_four").pop();
    w.read_ref("out").push_int(1).assign().set_return("out");
    w.end_entity();
    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Halted(HaltReason::Explicit));
    assert_eq!(outcome.return_value, None);

    let mut vm = machine();
    vm.register_library_function("stop", stop);
    let mut w = BytecodeWriter::new();
    w.invoke_meta("stop");
    w.push_int(1).pop();
    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Halted(HaltReason::Explicit));
}

#[test]
fn runaway_recursion_hits_the_call_depth_limit() {
    let vm = machine_with(VmConfig {
        max_call_depth: 16,
        ..VmConfig::default()
    });
    let mut w = BytecodeWriter::new();
    w.begin_entity(tags::FUNCTION, "forever").invoke("forever").end_entity();
    w.invoke("forever");
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("call depth limit"));
}

#[test]
fn invoking_a_function_by_falling_into_it_skips_the_body() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_entity(tags::FUNCTION, "never").halt().end_entity();
    w.read_ref("out").push_int(3).assign().set_return("out");
    w.end_entity();
    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(3)));
}
