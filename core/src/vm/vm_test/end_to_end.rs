use super::*;
use crate::frame::StackSpace;

/// `result = plus(2, 3)` with `plus` declared but never given a body.
fn sum_program(w: &mut BytecodeWriter) {
    w.define_scope(
        "plus",
        None,
        &[param("a", TypeId::INTEGER), param("b", TypeId::INTEGER), returns("r", TypeId::INTEGER)],
    );
    w.define_scope("globals", None, &[local("result", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("result").push_int(2).push_int(3).invoke("plus").assign();
    w.set_return("result");
    w.end_entity();
}

#[test]
fn interpreted_body_computes_the_sum() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope(
        "plus",
        None,
        &[param("a", TypeId::INTEGER), param("b", TypeId::INTEGER), returns("r", TypeId::INTEGER)],
    );
    w.begin_entity(tags::FUNCTION, "plus");
    w.read_ref("r").read("a").read("b").invoke_meta("add").assign();
    w.set_return("r");
    w.end_entity();
    w.define_scope("globals", None, &[local("result", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("result").push_int(2).push_int(3).invoke("plus").assign();
    w.set_return("result");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(5)));
}

#[test]
fn native_entry_point_computes_the_sum() {
    let mut vm = machine();
    vm.register_native_entry(
        "plus",
        Arc::new(|stack: &mut StackSpace| -> Result<()> {
            let b = stack.pop()?.as_integer()?;
            let a = stack.pop()?.as_integer()?;
            stack.push(Value::Integer(a + b))
        }),
    );
    let mut w = BytecodeWriter::new();
    sum_program(&mut w);

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(5)));
}

extern "C" fn epoch_test_add(a: i32, b: i32) -> i32 {
    a + b
}

#[test]
fn external_function_computes_the_sum() {
    let mut vm = machine();
    vm.register_native_symbol("epoch_test_add", epoch_test_add as usize);
    let mut w = BytecodeWriter::new();
    w.tag("plus", "external", &["mocklib", "epoch_test_add"]);
    sum_program(&mut w);

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(5)));
}

#[test]
fn programs_survive_a_codec_round_trip_through_the_loader() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("greeting", TypeId::STRING)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("greeting").push_string("hello").assign();
    w.set_return("greeting");
    w.end_entity();
    let bytes = w.finish().unwrap();

    let program = vm.load(&bytes).unwrap();
    let first = vm.execute_program(&program).unwrap();
    let second = vm.execute_program(&program).unwrap();
    assert_eq!(first.return_value, second.return_value);
    assert_eq!(text(&vm, first.return_value.as_ref().unwrap()), "hello");
}
