//! Meta-controls for the conditional and loop entities front ends emit.
//!
//! `if` and `elseif` links take a boolean condition pushed just before their
//! `BeginEntity`; `else` always runs. A `while` link repeats the whole chain
//! while its condition holds, so the condition is evaluated once more than
//! the body runs.

use std::sync::Arc;

use anyhow::Result;
use epoch_core::{ControlOutcome, ExecutionContext, VirtualMachine};

pub const IF: u32 = 0x101;
pub const ELSEIF: u32 = 0x102;
pub const ELSE: u32 = 0x103;
pub const WHILE: u32 = 0x104;

fn condition(ctx: &mut ExecutionContext<'_>) -> Result<bool> {
    ctx.pop()?.unwrap_sum().as_boolean()
}

fn if_link(ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(if condition(ctx)? {
        ControlOutcome::ExecuteCurrentLink
    } else {
        ControlOutcome::PassToNextLink
    })
}

fn else_link(_ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(ControlOutcome::ExecuteCurrentLink)
}

fn while_link(ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
    Ok(if condition(ctx)? {
        ControlOutcome::ExecuteAndRepeatChain
    } else {
        ControlOutcome::ExitChain
    })
}

pub(crate) fn register(vm: &mut VirtualMachine) -> Result<()> {
    vm.register_entity_controller(IF, Arc::new(if_link))?;
    vm.register_entity_controller(ELSEIF, Arc::new(if_link))?;
    vm.register_entity_controller(ELSE, Arc::new(else_link))?;
    vm.register_entity_controller(WHILE, Arc::new(while_link))?;
    Ok(())
}
