use super::*;
use crate::value::SumValue;

const POINT: TypeId = TypeId::structure(0);
const NUMERIC: TypeId = TypeId::sum_type(0);

fn define_point(w: &mut BytecodeWriter) {
    w.define_structure(
        POINT,
        &[("x", TypeId::INTEGER), ("y", TypeId::INTEGER), ("label", TypeId::STRING)],
    );
}

#[test]
fn members_are_reached_through_references_and_handles() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_point(&mut w);
    w.define_scope("globals", None, &[local("p", POINT), local("q", POINT)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("p").alloc_structure(POINT).assign();
    w.read_ref("p").bind_member_ref("x").push_int(3).assign();
    w.read("p").bind_member_by_handle("y").push_int(4).assign();
    w.push_string("origin").copy_to_structure("p", "label");
    w.read_ref("q").read("p").emit(crate::bytecode::Instruction::CopyStructure).assign();
    w.push_int(9).copy_to_structure("q", "x");
    w.copy_from_structure("p", "x").invoke_meta("record");
    w.copy_from_structure("q", "x").invoke_meta("record");
    w.copy_from_structure("q", "y").invoke_meta("record");
    w.copy_from_structure("q", "label").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    let recorded = take_recorded();
    assert_eq!(&recorded[..3], &[Value::Integer(3), Value::Integer(9), Value::Integer(4)]);
    assert_eq!(text(&vm, &recorded[3]), "origin");
}

#[test]
fn members_keep_their_declared_type() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_point(&mut w);
    w.define_scope("globals", None, &[local("p", POINT)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("p").alloc_structure(POINT).assign();
    w.push_string("not a number").copy_to_structure("p", "x");
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("type mismatch"));
}

#[test]
fn member_access_through_a_null_handle_is_fatal() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    define_point(&mut w);
    w.define_scope("globals", None, &[local("p", POINT)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read("p").bind_member_by_handle("x").pop();
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("null structure handle"));
}

#[test]
fn sum_variables_track_their_current_base() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_sum_type(NUMERIC, &[TypeId::INTEGER, TypeId::STRING]);
    w.define_scope("globals", None, &[local("v", NUMERIC)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read("v").invoke_meta("record");
    w.read_ref("v").push_int(5);
    w.emit(crate::bytecode::Instruction::AssignSumType);
    w.read("v").invoke_meta("record");
    w.push_string("five").construct_sum_type("v");
    w.read("v").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    let recorded = take_recorded();
    assert_eq!(recorded[0], Value::Sum(SumValue::new(NUMERIC, TypeId::INTEGER, Value::Integer(0))));
    assert_eq!(recorded[1], Value::Sum(SumValue::new(NUMERIC, TypeId::INTEGER, Value::Integer(5))));
    match &recorded[2] {
        Value::Sum(sum) => {
            assert_eq!(sum.tag, TypeId::STRING);
            assert_eq!(text(&vm, &sum.payload), "five");
        }
        other => panic!("expected a sum value, got {}", other),
    }
}

#[test]
fn sum_variables_reject_foreign_bases() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_sum_type(NUMERIC, &[TypeId::INTEGER, TypeId::STRING]);
    w.define_scope("globals", None, &[local("v", NUMERIC), local("plain", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.push(Value::Boolean(true)).construct_sum_type("v");
    w.end_entity();
    assert!(vm.execute_bytecode(&w.finish().unwrap()).is_err());

    let mut w = BytecodeWriter::new();
    w.define_sum_type(NUMERIC, &[TypeId::INTEGER, TypeId::STRING]);
    w.define_scope("globals", None, &[local("v", NUMERIC), local("plain", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("plain").push_int(1);
    w.emit(crate::bytecode::Instruction::AssignSumType);
    w.end_entity();
    let err = vm.execute_bytecode(&w.finish().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("AssignSumType"));
}

#[test]
fn register_can_be_assigned_through_a_temporary_reference() {
    let vm = machine();
    let mut w = BytecodeWriter::new();
    w.define_scope("globals", None, &[local("out", TypeId::INTEGER)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("out").push_int(6).assign().set_return("out");
    w.emit(crate::bytecode::Instruction::TempReferenceFromRegister);
    w.push_int(8).assign();
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.return_value, Some(Value::Integer(8)));
}
