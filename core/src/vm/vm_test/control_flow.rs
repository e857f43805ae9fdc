use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;

/// if (first) out = 1 elseif (second) out = 2 else out = 3
fn conditional(first: bool, second: bool) -> BytecodeWriter {
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_chain();
    w.push_bool(first);
    w.begin_entity(IF, "if").read_ref("out").push_int(1).assign().end_entity();
    w.push_bool(second);
    w.begin_entity(ELSEIF, "elseif").read_ref("out").push_int(2).assign().end_entity();
    w.begin_entity(ELSE, "else").read_ref("out").push_int(3).assign().end_entity();
    w.end_chain();
    w.set_return("out");
    w.end_entity();
    w
}

#[test]
fn first_matching_link_runs_and_the_rest_are_skipped() {
    let vm = machine();
    for (first, second, expected) in [(true, true, 1), (false, true, 2), (false, false, 3)] {
        let outcome = run(&vm, conditional(first, second));
        assert_eq!(outcome.result, ExecutionResult::Ok);
        assert_eq!(outcome.return_value, Some(Value::Integer(expected)));
    }
}

#[test]
fn while_loop_runs_its_body_k_times_and_checks_k_plus_one_times() {
    let mut vm = machine();
    let consulted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&consulted);
    let counting = move |ctx: &mut ExecutionContext<'_>| -> Result<ControlOutcome> {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(if ctx.pop()?.as_boolean()? {
            ControlOutcome::ExecuteAndRepeatChain
        } else {
            ControlOutcome::ExitChain
        })
    };
    vm.register_entity_controller(WHILE, Arc::new(counting)).unwrap();

    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("i", TypeId::INTEGER), local("body", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_chain();
    w.read("i").push_int(4).invoke_meta("lt");
    w.begin_entity(WHILE, "loop");
    w.read_ref("i").read("i").push_int(1).invoke_meta("add").assign();
    w.read_ref("body").read("body").push_int(1).invoke_meta("add").assign();
    w.end_entity();
    w.end_chain();
    w.set_return("body");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(outcome.return_value, Some(Value::Integer(4)));
    assert_eq!(consulted.load(Ordering::SeqCst), 5);
}

#[test]
fn while_loop_with_false_condition_never_runs() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("hits", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_chain();
    w.push_bool(false);
    w.begin_entity(WHILE, "while");
    w.read_ref("hits").push_int(99).assign();
    w.end_entity();
    w.end_chain();
    w.set_return("hits");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(0)));
}

#[test]
fn exit_chain_skips_the_remaining_links() {
    let mut vm = machine();
    vm.register_entity_controller(0x181, Arc::new(|_ctx: &mut ExecutionContext<'_>| -> Result<ControlOutcome> {
        Ok(ControlOutcome::ExitChain)
    }))
    .unwrap();

    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_chain();
    w.begin_entity(0x181, "stop").read_ref("out").push_int(1).assign().end_entity();
    w.begin_entity(ELSE, "else").read_ref("out").push_int(2).assign().end_entity();
    w.end_chain();
    // outside any chain an exit only skips its own body
    w.begin_entity(0x181, "alone").read_ref("out").push_int(3).assign().end_entity();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(0)));
}

#[test]
fn repeat_outside_a_chain_is_fatal() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.push_bool(true);
    w.begin_entity(WHILE, "while").end_entity();
    assert!(vm.execute_bytecode(&w.finish().unwrap()).is_err());
}

#[test]
fn unregistered_custom_tag_is_fatal() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.begin_entity(0x1ff, "mystery").end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("no entity controller"));
}

#[test]
fn reserved_tags_cannot_get_controllers() {
    let mut vm = machine();
    assert!(vm.register_entity_controller(tags::FUNCTION, Arc::new(otherwise)).is_err());
}

#[test]
fn free_block_scope_nests_and_disappears() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.define_scope("block", None, &[local("tmp", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_entity(tags::FREE_BLOCK, "block");
    w.read_ref("tmp").push_int(5).assign();
    w.read_ref("out").read("tmp").assign();
    w.end_entity();
    w.set_return("out");
    w.end_entity();
    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(5)));

    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.define_scope("block", None, &[local("tmp", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.begin_entity(tags::FREE_BLOCK, "block").end_entity();
    w.read("tmp").pop();
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("unknown variable"));
}

#[test]
fn halt_instruction_stops_the_run() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_int(1).assign().set_return("out");
    w.halt();
    w.read_ref("out").push_int(2).assign().set_return("out");
    w.end_entity();
    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Halted(HaltReason::Explicit));
    assert_eq!(outcome.return_value, Some(Value::Integer(1)));
}

#[test]
fn assignment_through_identifiers_and_stack_reads() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.push_identifier("out");
    w.push_int(7);
    w.emit(crate::bytecode::Instruction::ReadStack(0));
    w.invoke_meta("add");
    w.emit(crate::bytecode::Instruction::AssignThroughIdentifier);
    w.set_return("out");
    w.end_entity();
    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(14)));
}
