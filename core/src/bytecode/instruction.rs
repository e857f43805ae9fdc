use std::fmt;

use crate::heap::StringHandle;
use crate::types::{TypeId, VariableEntry};
use crate::value::Value;

use super::opcode::Opcode;

/// One parameter slot of a `PatternMatch` candidate. `literal: None` accepts
/// any value of `type_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamPattern {
    pub type_id: TypeId,
    pub literal: Option<Value>,
}

/// One parameter slot of a `TypeMatch` candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeParam {
    pub type_id: TypeId,
    pub by_ref: bool,
}

/// Decoded instruction.
///
/// `InvokeOffset` carries a byte offset when freshly decoded; the loader
/// rewrites it to an instruction index. The `entry` of the dispatch
/// instructions is filled in by the loader as well.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Halt,
    NoOp,
    Push(Value),
    Pop,
    Read(StringHandle),
    ReadRef(StringHandle),
    ReadRefAnnotated(StringHandle),
    ReadStack(u32),
    ReadParam(u32),
    Assign,
    AssignThroughIdentifier,
    AssignSumType,
    Invoke(StringHandle),
    InvokeOffset(usize),
    InvokeIndirect(StringHandle),
    InvokeNative(StringHandle),
    InvokeMeta(StringHandle),
    Return,
    SetRetVal(StringHandle),
    BeginEntity {
        tag: u32,
        name: StringHandle,
    },
    EndEntity,
    BeginChain,
    EndChain,
    PoolString {
        handle: StringHandle,
        text: String,
    },
    DefineLexicalScope {
        name: StringHandle,
        parent: Option<StringHandle>,
        variables: Vec<VariableEntry>,
    },
    DefineStructure {
        type_id: TypeId,
        members: Vec<(StringHandle, TypeId)>,
    },
    SumTypeDef {
        type_id: TypeId,
        bases: Vec<TypeId>,
    },
    BindRef {
        frames: u32,
        index: u32,
    },
    BindMemberRef(StringHandle),
    BindMemberByHandle(StringHandle),
    CopyFromStructure {
        variable: StringHandle,
        member: StringHandle,
    },
    CopyToStructure {
        variable: StringHandle,
        member: StringHandle,
    },
    CopyBuffer,
    CopyStructure,
    ConstructSumType(StringHandle),
    AllocStructure(TypeId),
    PatternMatch {
        target: StringHandle,
        entry: Option<usize>,
        patterns: Vec<ParamPattern>,
    },
    TypeMatch {
        target: StringHandle,
        entry: Option<usize>,
        params: Vec<TypeParam>,
    },
    Tag {
        target: StringHandle,
        tag: StringHandle,
        params: Vec<StringHandle>,
    },
    TempReferenceFromRegister,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::Halt,
            Instruction::NoOp => Opcode::NoOp,
            Instruction::Push(_) => Opcode::Push,
            Instruction::Pop => Opcode::Pop,
            Instruction::Read(_) => Opcode::Read,
            Instruction::ReadRef(_) => Opcode::ReadRef,
            Instruction::ReadRefAnnotated(_) => Opcode::ReadRefAnnotated,
            Instruction::ReadStack(_) => Opcode::ReadStack,
            Instruction::ReadParam(_) => Opcode::ReadParam,
            Instruction::Assign => Opcode::Assign,
            Instruction::AssignThroughIdentifier => Opcode::AssignThroughIdentifier,
            Instruction::AssignSumType => Opcode::AssignSumType,
            Instruction::Invoke(_) => Opcode::Invoke,
            Instruction::InvokeOffset(_) => Opcode::InvokeOffset,
            Instruction::InvokeIndirect(_) => Opcode::InvokeIndirect,
            Instruction::InvokeNative(_) => Opcode::InvokeNative,
            Instruction::InvokeMeta(_) => Opcode::InvokeMeta,
            Instruction::Return => Opcode::Return,
            Instruction::SetRetVal(_) => Opcode::SetRetVal,
            Instruction::BeginEntity { .. } => Opcode::BeginEntity,
            Instruction::EndEntity => Opcode::EndEntity,
            Instruction::BeginChain => Opcode::BeginChain,
            Instruction::EndChain => Opcode::EndChain,
            Instruction::PoolString { .. } => Opcode::PoolString,
            Instruction::DefineLexicalScope { .. } => Opcode::DefineLexicalScope,
            Instruction::DefineStructure { .. } => Opcode::DefineStructure,
            Instruction::SumTypeDef { .. } => Opcode::SumTypeDef,
            Instruction::BindRef { .. } => Opcode::BindRef,
            Instruction::BindMemberRef(_) => Opcode::BindMemberRef,
            Instruction::BindMemberByHandle(_) => Opcode::BindMemberByHandle,
            Instruction::CopyFromStructure { .. } => Opcode::CopyFromStructure,
            Instruction::CopyToStructure { .. } => Opcode::CopyToStructure,
            Instruction::CopyBuffer => Opcode::CopyBuffer,
            Instruction::CopyStructure => Opcode::CopyStructure,
            Instruction::ConstructSumType(_) => Opcode::ConstructSumType,
            Instruction::AllocStructure(_) => Opcode::AllocStructure,
            Instruction::PatternMatch { .. } => Opcode::PatternMatch,
            Instruction::TypeMatch { .. } => Opcode::TypeMatch,
            Instruction::Tag { .. } => Opcode::Tag,
            Instruction::TempReferenceFromRegister => Opcode::TempReferenceFromRegister,
        }
    }
}

fn write_entry(f: &mut fmt::Formatter<'_>, entry: Option<usize>) -> fmt::Result {
    match entry {
        Some(index) => write!(f, " -> @{}", index),
        None => Ok(()),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode().name();
        match self {
            Instruction::Push(value) => write!(f, "{} {}", op, value),
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
            | Instruction::ConstructSumType(h) => write!(f, "{} {}", op, h),
            Instruction::ReadStack(n) | Instruction::ReadParam(n) => write!(f, "{} {}", op, n),
            Instruction::InvokeOffset(target) => write!(f, "{} @{}", op, target),
            Instruction::BeginEntity { tag, name } => write!(f, "{} tag=0x{:x} {}", op, tag, name),
            Instruction::PoolString { handle, text } => write!(f, "{} {} {:?}", op, handle, text),
            Instruction::DefineLexicalScope { name, parent, variables } => {
                write!(f, "{} {}", op, name)?;
                if let Some(parent) = parent {
                    write!(f, " parent={}", parent)?;
                }
                write!(f, " vars={}", variables.len())
            }
            Instruction::DefineStructure { type_id, members } => {
                write!(f, "{} {} members={}", op, type_id, members.len())
            }
            Instruction::SumTypeDef { type_id, bases } => {
                write!(f, "{} {} [", op, type_id)?;
                for (i, base) in bases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", base)?;
                }
                f.write_str("]")
            }
            Instruction::BindRef { frames, index } => write!(f, "{} up={} slot={}", op, frames, index),
            Instruction::CopyFromStructure { variable, member } | Instruction::CopyToStructure { variable, member } => {
                write!(f, "{} {}.{}", op, variable, member)
            }
            Instruction::AllocStructure(type_id) => write!(f, "{} {}", op, type_id),
            Instruction::PatternMatch { target, entry, patterns } => {
                write!(f, "{} {} (", op, target)?;
                for (i, pattern) in patterns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &pattern.literal {
                        Some(literal) => write!(f, "{}", literal)?,
                        None => write!(f, "_:{}", pattern.type_id)?,
                    }
                }
                f.write_str(")")?;
                write_entry(f, *entry)
            }
            Instruction::TypeMatch { target, entry, params } => {
                write!(f, "{} {} (", op, target)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if param.by_ref {
                        f.write_str("ref ")?;
                    }
                    write!(f, "{}", param.type_id)?;
                }
                f.write_str(")")?;
                write_entry(f, *entry)
            }
            Instruction::Tag { target, tag, params } => {
                write!(f, "{} {} {}", op, target, tag)?;
                for param in params {
                    write!(f, " {}", param)?;
                }
                Ok(())
            }
            _ => f.write_str(op),
        }
    }
}
