//! Entities and chains.
//!
//! `BeginEntity(tag, name) … EndEntity` delimits a block. Reserved tags get
//! built-in scope handling; any other tag is handed to the
//! [`EntityController`] registered for it, which decides what happens to the
//! block. Consecutive entities wrapped in `BeginChain … EndChain` form
//! alternatives: once one link executes, control skips to the chain end.

use anyhow::{Result, anyhow, bail};
use tracing::trace;

use crate::bytecode::Instruction;
use crate::error::HaltReason;
use crate::frame::ActiveScope;
use crate::heap::StringHandle;
use crate::value::Value;

use super::context::ExecutionContext;
use super::exec::Flow;
use super::records::{ChainFrame, EntityFrame};

/// Entity tags understood by the interpreter itself. Tags from
/// [`FIRST_CUSTOM`](tags::FIRST_CUSTOM) upwards belong to controllers.
pub mod tags {
    pub const FUNCTION: u32 = 1;
    pub const FREE_BLOCK: u32 = 2;
    pub const GLOBALS: u32 = 3;
    pub const PATTERN_RESOLVER: u32 = 4;
    pub const TYPE_RESOLVER: u32 = 5;
    pub const FIRST_CUSTOM: u32 = 0x100;

    #[inline]
    pub fn is_reserved(tag: u32) -> bool {
        tag < FIRST_CUSTOM
    }

    /// Entities that are entered through a call rather than by falling into
    /// them.
    #[inline]
    pub fn is_invocable(tag: u32) -> bool {
        matches!(tag, FUNCTION | PATTERN_RESOLVER | TYPE_RESOLVER)
    }

    pub fn describe(tag: u32) -> &'static str {
        match tag {
            FUNCTION => "function",
            FREE_BLOCK => "free-block",
            GLOBALS => "globals",
            PATTERN_RESOLVER => "pattern-resolver",
            TYPE_RESOLVER => "type-resolver",
            _ => "custom",
        }
    }
}

/// What a controller decides for the link it was consulted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Enter the body; afterwards leave the enclosing chain.
    ExecuteCurrentLink,
    /// Skip the body and continue with the next link.
    PassToNextLink,
    /// Skip the body and everything after it up to the chain end.
    ExitChain,
    /// Enter the body; afterwards restart the chain from its first link.
    ExecuteAndRepeatChain,
}

pub trait EntityController: Send + Sync {
    /// Called every time control reaches the `BeginEntity` of a link with
    /// this controller's tag. Operands the front end pushed for the link
    /// (a condition, say) are on the stack.
    fn control(&self, ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome>;
}

impl<F> EntityController for F
where
    F: Fn(&mut ExecutionContext<'_>) -> Result<ControlOutcome> + Send + Sync,
{
    fn control(&self, ctx: &mut ExecutionContext<'_>) -> Result<ControlOutcome> {
        self(ctx)
    }
}

impl<'vm> ExecutionContext<'vm> {
    pub(super) fn begin_entity(&mut self, begin: usize, tag: u32, name: StringHandle) -> Result<Flow> {
        let end = self.program.entity_end(begin)?;
        let chain = self.program.enclosing_chain(begin);

        if tags::is_invocable(tag) {
            if !self.pending_call {
                // definitions are skipped when execution falls into them
                self.offset = end + 1;
                return Ok(Flow::Continue);
            }
            self.pending_call = false;
            let has_scope = tag == tags::FUNCTION && self.enter_function_scope(name)?;
            self.entities.push(EntityFrame {
                tag,
                begin,
                has_scope,
                chain: None,
                repeat: false,
            });
            return Ok(Flow::Continue);
        }

        match tag {
            tags::GLOBALS => {
                let has_scope = self.enter_block_scope(name, false)?;
                self.push_entity(tag, begin, has_scope, chain, false);
                Ok(Flow::Continue)
            }
            tags::FREE_BLOCK => {
                let has_scope = self.enter_block_scope(name, true)?;
                self.push_entity(tag, begin, has_scope, chain, false);
                Ok(Flow::Continue)
            }
            tag if tags::is_reserved(tag) => bail!("reserved entity tag 0x{:x} has no meaning", tag),
            tag => {
                let controller = self
                    .vm
                    .entity_controller(tag)
                    .ok_or_else(|| anyhow!("no entity controller registered for tag 0x{:x}", tag))?;
                let outcome = controller.control(self)?;
                trace!(target: "epoch::entity", tag, begin, ?outcome, "entity control");
                match outcome {
                    ControlOutcome::ExecuteCurrentLink | ControlOutcome::ExecuteAndRepeatChain => {
                        let repeat = outcome == ControlOutcome::ExecuteAndRepeatChain;
                        if repeat && chain.is_none() {
                            bail!("entity at instruction {} asked to repeat outside of a chain", begin);
                        }
                        let has_scope = self.enter_block_scope(name, true)?;
                        self.push_entity(tag, begin, has_scope, chain, repeat);
                    }
                    ControlOutcome::PassToNextLink => self.offset = end + 1,
                    ControlOutcome::ExitChain => match chain {
                        Some(chain_begin) => self.offset = self.program.chain_end(chain_begin)?,
                        None => self.offset = end + 1,
                    },
                }
                Ok(Flow::Continue)
            }
        }
    }

    pub(super) fn end_entity(&mut self) -> Result<Flow> {
        let frame = self
            .entities
            .pop()
            .ok_or_else(|| anyhow!("EndEntity without an active entity"))?;
        if frame.has_scope {
            self.scopes.pop();
        }
        match frame.tag {
            tags::FUNCTION => self.return_from_call(),
            tags::PATTERN_RESOLVER | tags::TYPE_RESOLVER => {
                let name = match &self.program.code()[frame.begin] {
                    Instruction::BeginEntity { name, .. } => self.vm.strings().get(*name)?.to_string(),
                    _ => String::new(),
                };
                Ok(Flow::Halt(HaltReason::DispatchExhausted(name)))
            }
            tags::GLOBALS | tags::FREE_BLOCK => Ok(Flow::Continue),
            _ => {
                if let Some(chain_begin) = frame.chain {
                    self.offset = if frame.repeat {
                        chain_begin + 1
                    } else {
                        self.program.chain_end(chain_begin)?
                    };
                }
                Ok(Flow::Continue)
            }
        }
    }

    pub(super) fn begin_chain(&mut self, begin: usize) -> Result<Flow> {
        let end = self.program.chain_end(begin)?;
        self.chains.push(ChainFrame { begin, end });
        Ok(Flow::Continue)
    }

    pub(super) fn end_chain(&mut self, at: usize) -> Result<Flow> {
        let frame = self
            .chains
            .pop()
            .ok_or_else(|| anyhow!("EndChain without an active chain"))?;
        if frame.end != at {
            bail!(
                "EndChain at instruction {} closes the chain opened at {} (expected end {})",
                at,
                frame.begin,
                frame.end
            );
        }
        Ok(Flow::Continue)
    }

    fn push_entity(&mut self, tag: u32, begin: usize, has_scope: bool, chain: Option<usize>, repeat: bool) {
        self.entities.push(EntityFrame {
            tag,
            begin,
            has_scope,
            chain,
            repeat,
        });
    }

    /// Creates the scope described under `name`, if any. Blocks nest inside
    /// the current scope; globals have no parent.
    fn enter_block_scope(&mut self, name: StringHandle, nested: bool) -> Result<bool> {
        let Some(description) = self.program.scope(name) else {
            return Ok(false);
        };
        let parent = if nested { self.scopes.len().checked_sub(1) } else { None };
        let scope = ActiveScope::new(description.clone(), parent, self.program.types())?;
        self.push_scope(scope);
        Ok(true)
    }

    /// Creates a function scope, binding parameters from the operand stack.
    /// The lexical parent is the innermost active scope whose description
    /// carries the parent's name.
    fn enter_function_scope(&mut self, name: StringHandle) -> Result<bool> {
        let Some(description) = self.program.scope(name).cloned() else {
            return Ok(false);
        };
        let parent = description
            .parent()
            .and_then(|parent_name| self.scopes.iter().rposition(|s| s.description().name() == parent_name));
        let mut scope = ActiveScope::new(description.clone(), parent, self.program.types())?;

        let count = description.parameter_count();
        let args = self.stack.pop_many(count)?;
        for (nth, arg) in args.into_iter().enumerate() {
            let slot = description.parameter_slot(nth)?;
            let variable = *description.variable(slot)?;
            let value = if variable.is_reference {
                match arg {
                    Value::Reference(reference) => Value::Reference(reference),
                    other => bail!(
                        "parameter {} of {} expects a reference, got {}",
                        nth,
                        self.vm.strings().get(name)?,
                        other.type_id()
                    ),
                }
            } else {
                let value = self.dereference(arg)?;
                self.coerce(variable.type_id, value)?
            };
            scope.set_slot(slot, value)?;
        }
        self.push_scope(scope);
        Ok(true)
    }
}
