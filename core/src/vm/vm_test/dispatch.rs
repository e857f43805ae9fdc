use super::*;

const NUMERIC: TypeId = TypeId::sum_type(0);

/// One-parameter function returning a fixed string.
fn define_constant(w: &mut BytecodeWriter, name: &str, param_type: TypeId, result: &str) {
    w.define_scope(name, None, &[param("n", param_type), returns("r", TypeId::STRING)]);
    w.begin_entity(tags::FUNCTION, name);
    w.read_ref("r").push_string(result).assign();
    w.set_return("r");
    w.end_entity();
}

fn literal(value: i32) -> ParamPattern {
    ParamPattern {
        type_id: TypeId::INTEGER,
        literal: Some(Value::Integer(value)),
    }
}

fn pick_program(arg: i32, with_default: bool) -> BytecodeWriter {
    let mut w = BytecodeWriter::new();
    define_constant(&mut w, "pick_zero", TypeId::INTEGER, "zero");
    define_constant(&mut w, "pick_one", TypeId::INTEGER, "one");
    define_constant(&mut w, "pick_any", TypeId::INTEGER, "many");
    w.begin_entity(tags::PATTERN_RESOLVER, "pick");
    w.pattern_match("pick_zero", vec![literal(0)]);
    w.pattern_match("pick_one", vec![literal(1)]);
    if with_default {
        w.pattern_match(
            "pick_any",
            vec![ParamPattern {
                type_id: TypeId::INTEGER,
                literal: None,
            }],
        );
    }
    w.end_entity();
    w.define_scope("globals", None, &[local("out", TypeId::STRING)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_int(arg).invoke("pick").assign();
    w.set_return("out");
    w.end_entity();
    w
}

#[test]
fn pattern_dispatch_takes_the_first_matching_candidate() {
    let vm = machine();
    for (arg, expected) in [(0, "zero"), (1, "one"), (7, "many")] {
        let outcome = run(&vm, pick_program(arg, true));
        assert_eq!(outcome.result, ExecutionResult::Ok);
        assert_eq!(text(&vm, outcome.return_value.as_ref().unwrap()), expected);
    }
}

#[test]
fn exhausted_pattern_dispatch_halts() {
    let vm = machine();
    let outcome = run(&vm, pick_program(7, false));
    assert_eq!(
        outcome.result,
        ExecutionResult::Halted(HaltReason::DispatchExhausted("pick".to_string()))
    );
}

#[test]
fn string_literals_match_by_content() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_constant(&mut w, "greet", TypeId::STRING, "matched");
    define_constant(&mut w, "other", TypeId::STRING, "missed");
    let hello = w.intern("hello");
    w.begin_entity(tags::PATTERN_RESOLVER, "route");
    w.pattern_match(
        "greet",
        vec![ParamPattern {
            type_id: TypeId::STRING,
            literal: Some(Value::String(hello)),
        }],
    );
    w.pattern_match(
        "other",
        vec![ParamPattern {
            type_id: TypeId::STRING,
            literal: None,
        }],
    );
    w.end_entity();
    w.define_scope("globals", None, &[local("out", TypeId::STRING)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_string("hello").invoke("route").assign();
    w.set_return("out");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(text(&vm, outcome.return_value.as_ref().unwrap()), "matched");
}

fn describe_program(stash: impl FnOnce(&mut BytecodeWriter)) -> BytecodeWriter {
    let mut w = BytecodeWriter::new();
    w.define_sum_type(NUMERIC, &[TypeId::INTEGER, TypeId::STRING]);
    define_constant(&mut w, "describe_int", TypeId::INTEGER, "integer");
    define_constant(&mut w, "describe_str", TypeId::STRING, "string");
    w.begin_entity(tags::TYPE_RESOLVER, "describe");
    w.type_match(
        "describe_int",
        vec![TypeParam {
            type_id: TypeId::INTEGER,
            by_ref: false,
        }],
    );
    w.type_match(
        "describe_str",
        vec![TypeParam {
            type_id: TypeId::STRING,
            by_ref: false,
        }],
    );
    w.end_entity();
    w.define_scope("globals", None, &[local("v", NUMERIC), local("out", TypeId::STRING)]);
    w.begin_entity(tags::GLOBALS, "globals");
    stash(&mut w);
    w.read_ref("out").read("v").invoke("describe").assign();
    w.set_return("out");
    w.end_entity();
    w
}

#[test]
fn type_dispatch_looks_through_sum_values() {
    let vm = machine();
    let outcome = run(
        &vm,
        describe_program(|w| {
            w.push_string("hey").construct_sum_type("v");
        }),
    );
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(text(&vm, outcome.return_value.as_ref().unwrap()), "string");

    let outcome = run(
        &vm,
        describe_program(|w| {
            w.push_int(3).construct_sum_type("v");
        }),
    );
    assert_eq!(text(&vm, outcome.return_value.as_ref().unwrap()), "integer");
}

#[test]
fn by_reference_type_parameters_require_references() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope(
        "takes_ref",
        None,
        &[
            ("x", TypeId::INTEGER, VariableOrigin::Parameter, true),
            returns("r", TypeId::STRING),
        ],
    );
    w.begin_entity(tags::FUNCTION, "takes_ref");
    w.read_ref("r").push_string("by ref").assign();
    w.set_return("r");
    w.end_entity();
    define_constant(&mut w, "takes_value", TypeId::INTEGER, "by value");
    w.begin_entity(tags::TYPE_RESOLVER, "which");
    w.type_match(
        "takes_ref",
        vec![TypeParam {
            type_id: TypeId::INTEGER,
            by_ref: true,
        }],
    );
    w.type_match(
        "takes_value",
        vec![TypeParam {
            type_id: TypeId::INTEGER,
            by_ref: false,
        }],
    );
    w.end_entity();
    w.define_scope("globals", None, &[local("n", TypeId::INTEGER), local("out", TypeId::STRING)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").read_ref("n").invoke("which").assign();
    w.read("out").invoke_meta("record");
    w.read_ref("out").read("n").invoke("which").assign();
    w.read("out").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    let recorded = take_recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(text(&vm, &recorded[0]), "by ref");
    assert_eq!(text(&vm, &recorded[1]), "by value");
}

#[test]
fn dispatch_targets_must_be_functions() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.begin_entity(tags::PATTERN_RESOLVER, "pick");
    w.pattern_match("missing", vec![literal(0)]);
    w.end_entity();
    assert!(vm.execute_bytecode(&w.finish().unwrap()).is_err());
}
