use super::*;

const NUMERIC: TypeId = TypeId::sum_type(0);

fn alias(name: &str) -> (&str, TypeId, VariableOrigin, bool) {
    (name, TypeId::INTEGER, VariableOrigin::Local, true)
}

/// Replaces the reference on top of the stack with its type id.
fn reference_type(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let reference = ctx.stack_mut().pop()?.as_reference()?;
    ctx.push(Value::Integer(reference.type_id.raw() as i32))
}

fn make_buffer(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let handle = ctx.buffers().insert(vec![1, 2, 3])?;
    ctx.push(Value::Buffer(handle))
}

fn poke(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let handle = ctx.pop()?.as_buffer()?;
    ctx.buffers().get_mut(handle)?[0] = 9;
    Ok(())
}

fn first_byte(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let handle = ctx.pop()?.as_buffer()?;
    let byte = ctx.buffers().get(handle)?[0];
    ctx.push(Value::Integer(byte as i32))
}

#[test]
fn parameters_are_visible_from_nested_blocks() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("f", None, &[param("a", TypeId::INTEGER), returns("r", TypeId::INTEGER)]);
    w.define_scope("if", Some("f"), &[local("tmp", TypeId::INTEGER)]);
    w.begin_entity(tags::FUNCTION, "f");
    w.push_bool(true);
    w.begin_entity(IF, "if");
    w.read_ref("tmp").read_param(0).assign();
    w.read_ref("r").read_param(0).assign();
    w.end_entity();
    w.set_return("r");
    w.end_entity();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_int(7).invoke("f").assign();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(7)));
}

#[test]
fn read_param_without_a_parameter_scope_is_fatal() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_param(0).pop();
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("ReadParam"));
}

#[test]
fn annotated_references_carry_the_runtime_type() {
    let mut vm = machine();
    vm.register_library_function("reference_type", reference_type);
    let mut w = BytecodeWriter::new();
    w.define_sum_type(NUMERIC, &[TypeId::INTEGER, TypeId::STRING]);
    w.define_scope("globals", None, &[local("v", NUMERIC)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.push_int(5).construct_sum_type("v");
    w.read_ref("v").invoke_meta("reference_type").invoke_meta("record");
    w.read_ref_annotated("v").invoke_meta("reference_type").invoke_meta("record");
    w.push_string("five").construct_sum_type("v");
    w.read_ref_annotated("v").invoke_meta("reference_type").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(
        take_recorded(),
        vec![
            Value::Integer(NUMERIC.raw() as i32),
            Value::Integer(TypeId::INTEGER.raw() as i32),
            Value::Integer(TypeId::STRING.raw() as i32),
        ]
    );
}

#[test]
fn bind_ref_reaches_enclosing_scopes() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("target", TypeId::INTEGER), alias("alias")]);
    w.define_scope("inner", None, &[local("x", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_entity(tags::FREE_BLOCK, "inner");
    w.read_ref("target").bind_ref(1, 1);
    w.end_entity();
    w.read_ref("alias").push_int(42).assign();
    w.read("alias").invoke_meta("record");
    w.set_return("target");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(42)));
    assert_eq!(take_recorded(), vec![Value::Integer(42)]);
}

#[test]
fn bind_ref_rejects_plain_slots() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("target", TypeId::INTEGER), local("plain", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("target").bind_ref(0, 1);
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("not a reference"));

    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("target", TypeId::INTEGER), alias("alias")]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("target").bind_ref(1, 1);
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("outermost scope"));
}

#[test]
fn references_into_ended_scopes_are_rejected() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[alias("alias")]);
    w.define_scope("first", None, &[local("tmp", TypeId::INTEGER)]);
    w.define_scope("second", None, &[local("other", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_entity(tags::FREE_BLOCK, "first");
    w.read_ref("tmp").push_int(1).assign();
    w.read_ref("tmp").bind_ref(1, 0);
    w.end_entity();
    // same scope position as "first", different scope
    w.begin_entity(tags::FREE_BLOCK, "second");
    w.read_ref("other").push_int(5).assign();
    w.read("alias").invoke_meta("record");
    w.end_entity();
    w.end_entity();

    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("outlived"));
    assert!(take_recorded().is_empty());
}

#[test]
fn copied_buffers_are_independent() {
    let mut vm = machine();
    vm.register_library_function("make_buffer", make_buffer);
    vm.register_library_function("poke", poke);
    vm.register_library_function("first_byte", first_byte);
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("src", TypeId::BUFFER), local("dup", TypeId::BUFFER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("src").invoke_meta("make_buffer").assign();
    w.read_ref("dup").read("src").copy_buffer().assign();
    w.read("dup").invoke_meta("poke");
    w.read("src").invoke_meta("first_byte").invoke_meta("record");
    w.read("dup").invoke_meta("first_byte").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(take_recorded(), vec![Value::Integer(1), Value::Integer(9)]);
}
