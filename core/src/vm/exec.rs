use std::sync::Arc;

use anyhow::{Result, anyhow, bail, ensure};

use crate::bytecode::Instruction;
use crate::error::HaltReason;
use crate::frame::ActiveScope;
use crate::heap::{ActiveStructure, StringHandle};
use crate::types::TypeId;
use crate::value::{RefTarget, Reference, Value};

use super::context::ExecutionContext;

/// What the run loop does after an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Leave the current run loop normally.
    Exit,
    Halt(HaltReason),
}

impl<'vm> ExecutionContext<'vm> {
    pub(super) fn step(&mut self, at: usize, instruction: &'vm Instruction) -> Result<Flow> {
        match instruction {
            Instruction::Halt => return Ok(Flow::Halt(HaltReason::Explicit)),
            Instruction::NoOp
            | Instruction::PoolString { .. }
            | Instruction::DefineLexicalScope { .. }
            | Instruction::DefineStructure { .. }
            | Instruction::SumTypeDef { .. }
            | Instruction::Tag { .. } => {}

            Instruction::Push(value) => self.stack.push(value.clone())?,
            Instruction::Pop => {
                self.stack.pop()?;
            }
            Instruction::Read(name) => {
                let value = self.read_variable(*name)?;
                self.stack.push(value)?;
            }
            Instruction::ReadRef(name) => {
                let reference = self.variable_reference(*name, false)?;
                self.stack.push(Value::Reference(reference))?;
            }
            Instruction::ReadRefAnnotated(name) => {
                let reference = self.variable_reference(*name, true)?;
                self.stack.push(Value::Reference(reference))?;
            }
            Instruction::ReadStack(depth) => {
                let value = self.stack.peek(*depth as usize)?.clone();
                self.stack.push(value)?;
            }
            Instruction::ReadParam(nth) => {
                let scope = self.parameter_scope()?;
                let slot = scope.description().parameter_slot(*nth as usize)?;
                let value = scope.slot(slot)?.clone();
                let value = self.dereference(value)?;
                self.stack.push(value)?;
            }

            Instruction::Assign => {
                let value = self.stack.pop()?;
                let target = self.stack.pop()?.as_reference()?;
                self.write_reference(target, value)?;
            }
            Instruction::AssignThroughIdentifier => {
                let value = self.stack.pop()?;
                let name = self.pop()?.as_string_handle()?;
                self.write_variable(name, value)?;
            }
            Instruction::AssignSumType => {
                let value = self.stack.pop()?;
                let target = self.stack.pop()?.as_reference()?;
                let declared = self.declared_type(target)?;
                ensure!(
                    declared.is_sum_type(),
                    "AssignSumType into a location of type {}",
                    declared
                );
                self.write_reference(target, value)?;
            }

            Instruction::Invoke(name) => return self.invoke_by_name(*name),
            Instruction::InvokeOffset(entry) => return self.call_interpreted(*entry, false),
            Instruction::InvokeIndirect(variable) => {
                let callee = match self.read_variable(*variable)?.unwrap_sum() {
                    Value::Function(name) => name,
                    other => bail!("indirect call through a {} value", other.type_id()),
                };
                return self.invoke_by_name(callee);
            }
            Instruction::InvokeNative(name) => {
                let entry = match self.program.native_entry(*name) {
                    Some(entry) => Arc::clone(entry),
                    None => self
                        .vm
                        .native_entry(&self.string(*name)?)
                        .ok_or_else(|| anyhow!("no native entry point for {}", name))?,
                };
                return self.invoke_native_entry(&entry);
            }
            Instruction::InvokeMeta(name) => {
                let text = self.string(*name)?;
                let function = self
                    .vm
                    .library_function(&text)
                    .ok_or_else(|| anyhow!("unknown library function {:?}", &*text))?;
                function(self)?;
            }
            Instruction::Return => return self.return_from_call(),
            Instruction::SetRetVal(name) => {
                let value = self.read_variable(*name)?;
                self.register.set(value);
            }

            Instruction::BeginEntity { tag, name } => return self.begin_entity(at, *tag, *name),
            Instruction::EndEntity => return self.end_entity(),
            Instruction::BeginChain => return self.begin_chain(at),
            Instruction::EndChain => return self.end_chain(at),

            Instruction::BindRef { frames, index } => {
                let reference = self.stack.pop()?.as_reference()?;
                let mut position = self
                    .scopes
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("BindRef outside of any scope"))?;
                for _ in 0..*frames {
                    position = self.scopes[position]
                        .parent()
                        .ok_or_else(|| anyhow!("BindRef walks past the outermost scope"))?;
                }
                let index = *index as usize;
                let scope = &mut self.scopes[position];
                ensure!(
                    scope.description().variable(index)?.is_reference,
                    "BindRef into slot {} which is not a reference",
                    index
                );
                scope.set_slot(index, Value::Reference(reference))?;
            }
            Instruction::BindMemberRef(member) => {
                let reference = self.stack.pop()?.as_reference()?;
                let holder = self.read_reference(reference)?.unwrap_sum();
                let member_ref = self.member_reference(&holder, *member)?;
                self.stack.push(Value::Reference(member_ref))?;
            }
            Instruction::BindMemberByHandle(member) => {
                let holder = self.pop()?.unwrap_sum();
                let member_ref = self.member_reference(&holder, *member)?;
                self.stack.push(Value::Reference(member_ref))?;
            }

            Instruction::CopyFromStructure { variable, member } => {
                let holder = self.read_variable(*variable)?;
                let member_ref = self.member_reference(&holder, *member)?;
                let value = self.read_reference(member_ref)?;
                self.stack.push(value)?;
            }
            Instruction::CopyToStructure { variable, member } => {
                let value = self.stack.pop()?;
                let holder = self.read_variable(*variable)?;
                let member_ref = self.member_reference(&holder, *member)?;
                self.write_reference(member_ref, value)?;
            }
            Instruction::CopyBuffer => {
                let source = self.pop()?.as_buffer()?;
                let copy = self.vm.buffers().clone_buffer(source)?;
                self.stack.push(Value::Buffer(copy))?;
            }
            Instruction::CopyStructure => {
                let (type_id, source) = self.pop()?.as_structure()?;
                let copy = {
                    let mut buffers = self.vm.buffers();
                    let mut structures = self.vm.structures();
                    structures.deep_copy(&mut buffers, source)?
                };
                self.stack.push(Value::Structure(type_id, copy))?;
            }
            Instruction::ConstructSumType(variable) => {
                let value = self.stack.pop()?;
                let (scope, index) = self.lookup_variable(*variable)?;
                let declared = self.scopes[scope].description().variable(index)?.type_id;
                ensure!(
                    declared.is_sum_type(),
                    "ConstructSumType into variable of type {}",
                    declared
                );
                let target = self.variable_target(scope, index)?;
                self.write_reference(
                    Reference {
                        type_id: declared,
                        target,
                    },
                    value,
                )?;
            }
            Instruction::AllocStructure(type_id) => {
                let handle = self.allocate_structure(*type_id)?;
                self.stack.push(Value::Structure(*type_id, handle))?;
            }

            Instruction::PatternMatch { target, entry, patterns } => {
                return self.pattern_match(*target, *entry, patterns);
            }
            Instruction::TypeMatch { target, entry, params } => {
                return self.type_match(*target, *entry, params);
            }

            Instruction::TempReferenceFromRegister => {
                let type_id = self.register.get().map(Value::type_id).unwrap_or(TypeId::NOTHING);
                self.stack.push(Value::Reference(Reference {
                    type_id,
                    target: RefTarget::Register,
                }))?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Zero-filled instance of structure `type_id` under a fresh handle.
    pub fn allocate_structure(&self, type_id: TypeId) -> Result<crate::heap::StructureHandle> {
        let types = self.program.types();
        let instance = ActiveStructure::new(types.structure(type_id)?, types)?;
        self.vm.structures().allocate(instance)
    }

    /// Reference to the slot holding `name`. A reference slot that is bound
    /// yields the reference it holds. `annotated` tags the reference with
    /// the current runtime type instead of the declared one.
    fn variable_reference(&self, name: StringHandle, annotated: bool) -> Result<Reference> {
        let (scope, index) = self.lookup_variable(name)?;
        let active = &self.scopes[scope];
        let variable = active.description().variable(index)?;
        let slot = active.slot(index)?;
        let mut reference = match slot {
            Value::Reference(bound) if variable.is_reference => *bound,
            _ => Reference {
                type_id: variable.type_id,
                target: self.variable_target(scope, index)?,
            },
        };
        if annotated {
            reference.type_id = self.read_reference(reference)?.runtime_type();
        }
        Ok(reference)
    }

    /// The innermost scope on the lexical chain that declares parameters,
    /// so blocks nested in a function body still see its arguments.
    fn parameter_scope(&self) -> Result<&ActiveScope> {
        let mut cursor = self.scopes.len().checked_sub(1);
        while let Some(position) = cursor {
            let scope = &self.scopes[position];
            if scope.description().parameter_count() > 0 {
                return Ok(scope);
            }
            cursor = scope.parent();
        }
        bail!("ReadParam outside of any scope with parameters")
    }

    fn member_reference(&self, holder: &Value, member: StringHandle) -> Result<Reference> {
        let (type_id, handle) = holder.as_structure()?;
        ensure!(!handle.is_none(), "member access through a null structure handle");
        let definition = self.program.types().structure(type_id)?;
        let (index, member) = definition.resolve_member(member)?;
        Ok(Reference {
            type_id: member.type_id,
            target: RefTarget::Member {
                structure: handle,
                index,
            },
        })
    }

    fn declared_type(&self, reference: Reference) -> Result<TypeId> {
        match reference.target {
            RefTarget::Variable {
                scope,
                index,
                generation,
            } => {
                let active = self.referenced_scope(scope, generation)?;
                match active.slot(index)? {
                    Value::Reference(inner) => self.declared_type(*inner),
                    _ => Ok(active.description().variable(index)?.type_id),
                }
            }
            RefTarget::Member { .. } => Ok(reference.type_id),
            RefTarget::Register => Ok(reference.type_id),
        }
    }
}
