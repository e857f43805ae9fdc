#[cfg(test)]
mod tests {
    use anyhow::Result;
    use epoch_core::types::VariableOrigin;
    use epoch_core::{BytecodeWriter, ExecutionResult, TypeId, Value, tags};

    use crate::test_support::machine;
    use crate::{ELSE, ELSEIF, IF, WHILE};

    fn grade(score: i32) -> Result<Value> {
        let mut w = BytecodeWriter::new();
        w.define_scope("globals", None, &[("out", TypeId::INTEGER, VariableOrigin::Local, false)]);
        w.begin_entity(tags::GLOBALS, "globals");
        w.begin_chain();
        w.push_int(score).push_int(90).invoke_meta(">=");
        w.begin_entity(IF, "a").read_ref("out").push_int(1).assign().end_entity();
        w.push_int(score).push_int(50).invoke_meta(">=");
        w.begin_entity(ELSEIF, "b").read_ref("out").push_int(2).assign().end_entity();
        w.begin_entity(ELSE, "c").read_ref("out").push_int(3).assign().end_entity();
        w.end_chain();
        w.set_return("out");
        w.end_entity();
        let outcome = machine().execute_bytecode(&w.finish()?)?;
        Ok(outcome.return_value.unwrap_or_default())
    }

    #[test]
    fn test_if_elseif_else() -> Result<()> {
        assert_eq!(grade(95)?, Value::Integer(1));
        assert_eq!(grade(60)?, Value::Integer(2));
        assert_eq!(grade(10)?, Value::Integer(3));
        Ok(())
    }

    #[test]
    fn test_while_loop() -> Result<()> {
        let mut w = BytecodeWriter::new();
        w.define_scope(
            "globals",
            None,
            &[
                ("i", TypeId::INTEGER, VariableOrigin::Local, false),
                ("total", TypeId::INTEGER, VariableOrigin::Local, false),
            ],
        );
        w.begin_entity(tags::GLOBALS, "globals");
        w.begin_chain();
        w.read("i").push_int(5).invoke_meta("<");
        w.begin_entity(WHILE, "loop");
        w.read_ref("i").read("i").push_int(1).invoke_meta("+").assign();
        w.read_ref("total").read("total").read("i").invoke_meta("+").assign();
        w.end_entity();
        w.end_chain();
        w.set_return("total");
        w.end_entity();

        let outcome = machine().execute_bytecode(&w.finish()?)?;
        assert_eq!(outcome.result, ExecutionResult::Ok);
        assert_eq!(outcome.return_value, Some(Value::Integer(15)));
        Ok(())
    }

    #[test]
    fn test_non_boolean_condition_is_an_error() -> Result<()> {
        let mut w = BytecodeWriter::new();
        w.begin_chain();
        w.push_int(1);
        w.begin_entity(IF, "a").end_entity();
        w.end_chain();
        assert!(machine().execute_bytecode(&w.finish()?).is_err());
        Ok(())
    }
}
