use super::*;
use crate::heap::gc::GcKinds;

const POINT: TypeId = TypeId::structure(0);

fn churn(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    for _ in 0..10 {
        ctx.allocate_structure(POINT)?;
    }
    let report = ctx.collect_garbage(GcKinds::ALL);
    ctx.push(Value::Integer(report.structures as i32))
}

fn pool_strings(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let mut last = None;
    for n in 0..5 {
        last = Some(ctx.pool_string(&format!("dynamic-{}", n))?);
    }
    if let Some(handle) = last {
        ctx.push(Value::String(handle))?;
    }
    let report = ctx.collect_garbage(GcKinds {
        strings: true,
        ..GcKinds::default()
    });
    ctx.push(Value::Integer(report.strings as i32))
}

#[test]
fn forced_collection_keeps_rooted_structures() {
    let mut vm = machine();
    vm.register_library_function("churn", churn);
    let mut w = BytecodeWriter::new();
    w.define_structure(POINT, &[("x", TypeId::INTEGER)]);
    w.define_scope("globals", None, &[local("p", POINT)]);
    w.begin_entity(tags::GLOBALS, "globals");
    w.read_ref("p").alloc_structure(POINT).assign();
    w.push_int(1).copy_to_structure("p", "x");
    w.invoke_meta("churn").invoke_meta("record");
    w.copy_from_structure("p", "x").invoke_meta("record");
    w.end_entity();

    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert_eq!(take_recorded(), vec![Value::Integer(10), Value::Integer(1)]);
}

#[test]
fn forced_collection_keeps_static_and_stacked_strings() {
    let mut vm = machine();
    vm.register_library_function("pool_strings", pool_strings);
    let mut w = BytecodeWriter::new();
    w.push_string("static");
    w.invoke_meta("pool_strings").invoke_meta("record").invoke_meta("record");
    w.pop();
    let outcome = run(&vm, w);
    assert_eq!(outcome.result, ExecutionResult::Ok);

    let recorded = take_recorded();
    assert_eq!(recorded[0], Value::Integer(4));
    assert_eq!(text(&vm, &recorded[1]), "dynamic-4");
    assert!(vm.strings().find("static").is_some());
    assert!(vm.strings().find("dynamic-0").is_none());
}

fn allocation_loop() -> BytecodeWriter {
    let mut w = BytecodeWriter::new();
    w.define_structure(POINT, &[("x", TypeId::INTEGER)]);
    for _ in 0..10 {
        w.alloc_structure(POINT).pop();
    }
    w
}

#[test]
fn threshold_triggers_automatic_collection() {
    let vm = machine_with(VmConfig {
        structure_gc_threshold: 4,
        ..VmConfig::default()
    });
    let outcome = run(&vm, allocation_loop());
    assert_eq!(outcome.result, ExecutionResult::Ok);
    assert!(vm.structures().len() <= 5, "{} structures survived", vm.structures().len());
}

#[test]
fn disabled_collector_keeps_everything() {
    let vm = machine_with(VmConfig {
        structure_gc_threshold: 4,
        gc_enabled: false,
        ..VmConfig::default()
    });
    run(&vm, allocation_loop());
    assert_eq!(vm.structures().len(), 10);
}
