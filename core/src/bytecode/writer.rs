//! Bytecode assembler.

use anyhow::{Result, anyhow, bail};

use crate::heap::StringHandle;
use crate::types::{TypeId, VariableEntry, VariableOrigin};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::value::Value;

use super::instruction::{Instruction, ParamPattern, TypeParam};

/// Appends the encoding of `instruction` to `out`.
pub fn encode_instruction(out: &mut Vec<u8>, instruction: &Instruction) -> Result<()> {
    write_u8(out, instruction.opcode().byte());
    match instruction {
        Instruction::Halt
        | Instruction::NoOp
        | Instruction::Pop
        | Instruction::Assign
        | Instruction::AssignThroughIdentifier
        | Instruction::AssignSumType
        | Instruction::Return
        | Instruction::EndEntity
        | Instruction::BeginChain
        | Instruction::EndChain
        | Instruction::CopyBuffer
        | Instruction::CopyStructure
        | Instruction::TempReferenceFromRegister => {}
        Instruction::Push(value) => {
            write_u32(out, value.type_id().raw());
            write_literal(out, value)?;
        }
        Instruction::Read(h)
        | Instruction::ReadRef(h)
        | Instruction::ReadRefAnnotated(h)
        | Instruction::Invoke(h)
        | Instruction::InvokeIndirect(h)
        | Instruction::InvokeNative(h)
        | Instruction::InvokeMeta(h)
        | Instruction::SetRetVal(h)
        | Instruction::BindMemberRef(h)
        | Instruction::BindMemberByHandle(h)
        | Instruction::ConstructSumType(h) => write_u32(out, h.raw()),
        Instruction::ReadStack(n) | Instruction::ReadParam(n) => write_u32(out, *n),
        Instruction::InvokeOffset(offset) => {
            let offset = u32::try_from(*offset).map_err(|_| anyhow!("invoke offset {} exceeds u32", offset))?;
            write_u32(out, offset);
        }
        Instruction::BeginEntity { tag, name } => {
            write_u32(out, *tag);
            write_u32(out, name.raw());
        }
        Instruction::PoolString { handle, text } => {
            if text.as_bytes().contains(&0) {
                bail!("string literal {:?} contains a NUL byte", text);
            }
            write_u32(out, handle.raw());
            out.extend_from_slice(text.as_bytes());
            write_u8(out, 0);
        }
        Instruction::DefineLexicalScope { name, parent, variables } => {
            write_u32(out, name.raw());
            write_u32(out, parent.unwrap_or(StringHandle::NONE).raw());
            write_len(out, variables.len())?;
            for variable in variables {
                write_u32(out, variable.name.raw());
                write_u32(out, variable.type_id.raw());
                write_u8(out, variable.origin.as_byte());
                write_u8(out, variable.is_reference as u8);
            }
        }
        Instruction::DefineStructure { type_id, members } => {
            write_u32(out, type_id.raw());
            write_len(out, members.len())?;
            for (member, member_type) in members {
                write_u32(out, member.raw());
                write_u32(out, member_type.raw());
            }
        }
        Instruction::SumTypeDef { type_id, bases } => {
            write_u32(out, type_id.raw());
            write_len(out, bases.len())?;
            for base in bases {
                write_u32(out, base.raw());
            }
        }
        Instruction::BindRef { frames, index } => {
            write_u32(out, *frames);
            write_u32(out, *index);
        }
        Instruction::CopyFromStructure { variable, member } | Instruction::CopyToStructure { variable, member } => {
            write_u32(out, variable.raw());
            write_u32(out, member.raw());
        }
        Instruction::AllocStructure(type_id) => write_u32(out, type_id.raw()),
        Instruction::PatternMatch { target, patterns, .. } => {
            write_u32(out, target.raw());
            write_len(out, patterns.len())?;
            for pattern in patterns {
                write_u32(out, pattern.type_id.raw());
                match &pattern.literal {
                    None => write_u8(out, 0),
                    Some(literal) => {
                        if literal.type_id() != pattern.type_id {
                            bail!("pattern literal {} does not have type {}", literal, pattern.type_id);
                        }
                        write_u8(out, 1);
                        write_literal(out, literal)?;
                    }
                }
            }
        }
        Instruction::TypeMatch { target, params, .. } => {
            write_u32(out, target.raw());
            write_len(out, params.len())?;
            for param in params {
                write_u32(out, param.type_id.raw());
                write_u8(out, param.by_ref as u8);
            }
        }
        Instruction::Tag { target, tag, params } => {
            write_u32(out, target.raw());
            write_u32(out, tag.raw());
            write_len(out, params.len())?;
            for param in params {
                write_u32(out, param.raw());
            }
        }
    }
    Ok(())
}

fn write_literal(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Nothing => {}
        Value::Integer(v) => write_u32(out, *v as u32),
        Value::Integer16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Integer64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Boolean(v) => write_u8(out, *v as u8),
        Value::Real(v) => write_u32(out, v.to_bits()),
        Value::String(h) | Value::Function(h) | Value::Identifier(h) => write_u32(out, h.raw()),
        other => bail!("{} values cannot be encoded as literals", other.type_id()),
    }
    Ok(())
}

fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| anyhow!("table of {} entries exceeds u32", len))?;
    write_u32(out, len);
    Ok(())
}

/// Builds a bytecode stream instruction by instruction.
///
/// Names are interned on first use: the writer allocates a handle and emits
/// the matching `PoolString` right away, so every handle is defined before
/// the instruction that uses it. Encoding errors are deferred to
/// [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    bytes: Vec<u8>,
    interned: FastHashMap<String, StringHandle>,
    next_handle: u32,
    error: Option<anyhow::Error>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            interned: fast_hash_map_new(),
            next_handle: 0,
            error: None,
        }
    }

    /// Byte offset the next instruction will be written at.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.bytes),
        }
    }

    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        if self.error.is_none()
            && let Err(err) = encode_instruction(&mut self.bytes, &instruction)
        {
            self.error = Some(err);
        }
        self
    }

    /// Returns the handle for `text`, emitting a `PoolString` the first time.
    pub fn intern(&mut self, text: &str) -> StringHandle {
        if let Some(handle) = self.interned.get(text) {
            return *handle;
        }
        self.next_handle += 1;
        let handle = StringHandle(self.next_handle);
        self.interned.insert(text.to_string(), handle);
        self.emit(Instruction::PoolString {
            handle,
            text: text.to_string(),
        });
        handle
    }

    pub fn halt(&mut self) -> &mut Self {
        self.emit(Instruction::Halt)
    }

    pub fn push(&mut self, value: Value) -> &mut Self {
        self.emit(Instruction::Push(value))
    }

    pub fn push_int(&mut self, value: i32) -> &mut Self {
        self.push(Value::Integer(value))
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push(Value::Boolean(value))
    }

    pub fn push_string(&mut self, text: &str) -> &mut Self {
        let handle = self.intern(text);
        self.push(Value::String(handle))
    }

    pub fn push_function(&mut self, name: &str) -> &mut Self {
        let handle = self.intern(name);
        self.push(Value::Function(handle))
    }

    pub fn push_identifier(&mut self, name: &str) -> &mut Self {
        let handle = self.intern(name);
        self.push(Value::Identifier(handle))
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Instruction::Pop)
    }

    pub fn read(&mut self, variable: &str) -> &mut Self {
        let h = self.intern(variable);
        self.emit(Instruction::Read(h))
    }

    pub fn read_ref(&mut self, variable: &str) -> &mut Self {
        let h = self.intern(variable);
        self.emit(Instruction::ReadRef(h))
    }

    pub fn read_ref_annotated(&mut self, variable: &str) -> &mut Self {
        let h = self.intern(variable);
        self.emit(Instruction::ReadRefAnnotated(h))
    }

    pub fn read_param(&mut self, nth: u32) -> &mut Self {
        self.emit(Instruction::ReadParam(nth))
    }

    pub fn assign(&mut self) -> &mut Self {
        self.emit(Instruction::Assign)
    }

    pub fn invoke(&mut self, function: &str) -> &mut Self {
        let h = self.intern(function);
        self.emit(Instruction::Invoke(h))
    }

    pub fn invoke_indirect(&mut self, variable: &str) -> &mut Self {
        let h = self.intern(variable);
        self.emit(Instruction::InvokeIndirect(h))
    }

    pub fn invoke_meta(&mut self, function: &str) -> &mut Self {
        let h = self.intern(function);
        self.emit(Instruction::InvokeMeta(h))
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instruction::Return)
    }

    pub fn set_return(&mut self, variable: &str) -> &mut Self {
        let h = self.intern(variable);
        self.emit(Instruction::SetRetVal(h))
    }

    pub fn begin_entity(&mut self, tag: u32, name: &str) -> &mut Self {
        let name = self.intern(name);
        self.emit(Instruction::BeginEntity { tag, name })
    }

    pub fn end_entity(&mut self) -> &mut Self {
        self.emit(Instruction::EndEntity)
    }

    pub fn begin_chain(&mut self) -> &mut Self {
        self.emit(Instruction::BeginChain)
    }

    pub fn end_chain(&mut self) -> &mut Self {
        self.emit(Instruction::EndChain)
    }

    /// Emits `DefineLexicalScope`. Variables are `(name, type, origin,
    /// is_reference)`.
    pub fn define_scope(
        &mut self,
        name: &str,
        parent: Option<&str>,
        variables: &[(&str, TypeId, VariableOrigin, bool)],
    ) -> &mut Self {
        let name = self.intern(name);
        let parent = parent.map(|p| self.intern(p));
        let variables = variables
            .iter()
            .map(|(var, type_id, origin, is_ref)| VariableEntry::new(self.intern(var), *type_id, *origin, *is_ref))
            .collect();
        self.emit(Instruction::DefineLexicalScope { name, parent, variables })
    }

    pub fn define_structure(&mut self, type_id: TypeId, members: &[(&str, TypeId)]) -> &mut Self {
        let members = members.iter().map(|(m, t)| (self.intern(m), *t)).collect();
        self.emit(Instruction::DefineStructure { type_id, members })
    }

    pub fn define_sum_type(&mut self, type_id: TypeId, bases: &[TypeId]) -> &mut Self {
        self.emit(Instruction::SumTypeDef {
            type_id,
            bases: bases.to_vec(),
        })
    }

    pub fn tag(&mut self, target: &str, tag: &str, params: &[&str]) -> &mut Self {
        let target = self.intern(target);
        let tag = self.intern(tag);
        let params = params.iter().map(|p| self.intern(p)).collect();
        self.emit(Instruction::Tag { target, tag, params })
    }

    pub fn alloc_structure(&mut self, type_id: TypeId) -> &mut Self {
        self.emit(Instruction::AllocStructure(type_id))
    }

    pub fn copy_to_structure(&mut self, variable: &str, member: &str) -> &mut Self {
        let variable = self.intern(variable);
        let member = self.intern(member);
        self.emit(Instruction::CopyToStructure { variable, member })
    }

    pub fn copy_from_structure(&mut self, variable: &str, member: &str) -> &mut Self {
        let variable = self.intern(variable);
        let member = self.intern(member);
        self.emit(Instruction::CopyFromStructure { variable, member })
    }

    /// Binds the reference on top of the stack into reference slot `index`
    /// of the scope `frames` lexical levels above the current one.
    pub fn bind_ref(&mut self, frames: u32, index: u32) -> &mut Self {
        self.emit(Instruction::BindRef { frames, index })
    }

    pub fn copy_buffer(&mut self) -> &mut Self {
        self.emit(Instruction::CopyBuffer)
    }

    pub fn bind_member_ref(&mut self, member: &str) -> &mut Self {
        let member = self.intern(member);
        self.emit(Instruction::BindMemberRef(member))
    }

    pub fn bind_member_by_handle(&mut self, member: &str) -> &mut Self {
        let member = self.intern(member);
        self.emit(Instruction::BindMemberByHandle(member))
    }

    pub fn construct_sum_type(&mut self, variable: &str) -> &mut Self {
        let variable = self.intern(variable);
        self.emit(Instruction::ConstructSumType(variable))
    }

    pub fn pattern_match(&mut self, target: &str, patterns: Vec<ParamPattern>) -> &mut Self {
        let target = self.intern(target);
        self.emit(Instruction::PatternMatch {
            target,
            entry: None,
            patterns,
        })
    }

    pub fn type_match(&mut self, target: &str, params: Vec<TypeParam>) -> &mut Self {
        let target = self.intern(target);
        self.emit(Instruction::TypeMatch {
            target,
            entry: None,
            params,
        })
    }
}
