//! Pattern and type dispatch.
//!
//! A resolver entity holds one `PatternMatch` or `TypeMatch` per candidate,
//! in priority order. Each compares the call's arguments (still on the
//! operand stack) against its table; the first match renormalizes the
//! arguments for the target and jumps to it, reusing the resolver's call
//! record. Falling through to the resolver's `EndEntity` halts.

use anyhow::{Result, anyhow, bail};
use tracing::trace;

use crate::bytecode::{Instruction, ParamPattern, TypeParam};
use crate::heap::StringHandle;
use crate::types::TypeId;
use crate::value::Value;

use super::context::ExecutionContext;
use super::entity::tags;
use super::exec::Flow;

impl<'vm> ExecutionContext<'vm> {
    pub(super) fn pattern_match(
        &mut self,
        target: StringHandle,
        entry: Option<usize>,
        patterns: &[ParamPattern],
    ) -> Result<Flow> {
        let entry = entry.ok_or_else(|| anyhow!("pattern target {} was never resolved", target))?;
        let args = self.stack.top(patterns.len())?.to_vec();
        for (arg, pattern) in args.into_iter().zip(patterns) {
            let arg = self.dereference(arg)?.unwrap_sum();
            if !self.type_accepts(pattern.type_id, arg.type_id())? {
                return Ok(Flow::Continue);
            }
            if let Some(literal) = &pattern.literal
                && !self.literal_equals(&arg, literal)?
            {
                return Ok(Flow::Continue);
            }
        }
        self.transfer_to_match(target, entry, patterns.len())
    }

    pub(super) fn type_match(&mut self, target: StringHandle, entry: Option<usize>, params: &[TypeParam]) -> Result<Flow> {
        let entry = entry.ok_or_else(|| anyhow!("type-match target {} was never resolved", target))?;
        let args = self.stack.top(params.len())?.to_vec();
        for (arg, param) in args.into_iter().zip(params) {
            if param.by_ref && !arg.is_reference() {
                return Ok(Flow::Continue);
            }
            let actual = self.dereference(arg)?.runtime_type();
            if !self.type_accepts(param.type_id, actual)? {
                return Ok(Flow::Continue);
            }
        }
        self.transfer_to_match(target, entry, params.len())
    }

    fn type_accepts(&self, expected: TypeId, actual: TypeId) -> Result<bool> {
        if expected == actual {
            return Ok(true);
        }
        if expected.is_sum_type() {
            return Ok(self.program.types().variant(expected)?.contains(actual));
        }
        Ok(false)
    }

    /// String-like values compare by pooled content, everything else by
    /// value.
    fn literal_equals(&self, arg: &Value, literal: &Value) -> Result<bool> {
        if arg.type_id().is_string_like() && literal.type_id().is_string_like() {
            let left = self.string(arg.as_string_handle()?)?;
            let right = self.string(literal.as_string_handle()?)?;
            return Ok(left == right);
        }
        Ok(arg == literal)
    }

    fn transfer_to_match(&mut self, target: StringHandle, entry: usize, count: usize) -> Result<Flow> {
        let resolver = self
            .entities
            .pop()
            .ok_or_else(|| anyhow!("dispatch outside of a resolver"))?;
        if !matches!(resolver.tag, tags::PATTERN_RESOLVER | tags::TYPE_RESOLVER) {
            bail!("dispatch inside a {} entity", tags::describe(resolver.tag));
        }

        let program = self.program;
        let description = match &program.code()[entry] {
            Instruction::BeginEntity { name, .. } => program.scope(*name),
            other => bail!("dispatch target is {}, not a function", other.opcode()),
        };
        let args = self.stack.pop_many(count)?;
        for (nth, arg) in args.into_iter().enumerate() {
            let expected = match description {
                Some(description) => Some(*description.variable(description.parameter_slot(nth)?)?),
                None => None,
            };
            let value = match expected {
                Some(variable) if variable.is_reference => arg,
                Some(variable) if variable.type_id.is_sum_type() => self.dereference(arg)?,
                _ => self.dereference(arg)?.unwrap_sum(),
            };
            self.stack.push(value)?;
        }

        trace!(target: "epoch::dispatch", %target, entry, "dispatch matched");
        self.pending_call = true;
        self.offset = entry;
        Ok(Flow::Continue)
    }
}
