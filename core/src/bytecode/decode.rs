use anyhow::{Context, Result, bail};

use crate::heap::StringHandle;
use crate::types::{TypeId, VariableEntry, VariableOrigin};
use crate::value::Value;

use super::instruction::{Instruction, ParamPattern, TypeParam};
use super::opcode::Opcode;

/// Decodes a whole stream, pairing each instruction with its byte offset.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<(usize, Instruction)>> {
    let mut cursor = 0usize;
    let mut out = Vec::new();
    while cursor < bytes.len() {
        let offset = cursor;
        let instruction =
            decode_instruction(bytes, &mut cursor).with_context(|| format!("at byte offset {}", offset))?;
        out.push((offset, instruction));
    }
    Ok(out)
}

/// Decodes one instruction starting at `*cursor` and advances past its
/// operands.
pub fn decode_instruction(bytes: &[u8], cursor: &mut usize) -> Result<Instruction> {
    let opcode = Opcode::from_byte(read_u8(bytes, cursor)?)?;
    Ok(match opcode {
        Opcode::Halt => Instruction::Halt,
        Opcode::NoOp => Instruction::NoOp,
        Opcode::Push => {
            let type_id = TypeId(read_u32(bytes, cursor)?);
            Instruction::Push(read_literal(type_id, bytes, cursor)?)
        }
        Opcode::Pop => Instruction::Pop,
        Opcode::Read => Instruction::Read(read_handle(bytes, cursor)?),
        Opcode::ReadRef => Instruction::ReadRef(read_handle(bytes, cursor)?),
        Opcode::ReadRefAnnotated => Instruction::ReadRefAnnotated(read_handle(bytes, cursor)?),
        Opcode::ReadStack => Instruction::ReadStack(read_u32(bytes, cursor)?),
        Opcode::ReadParam => Instruction::ReadParam(read_u32(bytes, cursor)?),
        Opcode::Assign => Instruction::Assign,
        Opcode::AssignThroughIdentifier => Instruction::AssignThroughIdentifier,
        Opcode::AssignSumType => Instruction::AssignSumType,
        Opcode::Invoke => Instruction::Invoke(read_handle(bytes, cursor)?),
        Opcode::InvokeOffset => Instruction::InvokeOffset(read_u32(bytes, cursor)? as usize),
        Opcode::InvokeIndirect => Instruction::InvokeIndirect(read_handle(bytes, cursor)?),
        Opcode::InvokeNative => Instruction::InvokeNative(read_handle(bytes, cursor)?),
        Opcode::InvokeMeta => Instruction::InvokeMeta(read_handle(bytes, cursor)?),
        Opcode::Return => Instruction::Return,
        Opcode::SetRetVal => Instruction::SetRetVal(read_handle(bytes, cursor)?),
        Opcode::BeginEntity => {
            let tag = read_u32(bytes, cursor)?;
            let name = read_handle(bytes, cursor)?;
            Instruction::BeginEntity { tag, name }
        }
        Opcode::EndEntity => Instruction::EndEntity,
        Opcode::BeginChain => Instruction::BeginChain,
        Opcode::EndChain => Instruction::EndChain,
        Opcode::PoolString => {
            let handle = read_handle(bytes, cursor)?;
            let text = read_cstring(bytes, cursor)?;
            Instruction::PoolString { handle, text }
        }
        Opcode::DefineLexicalScope => {
            let name = read_handle(bytes, cursor)?;
            let parent = read_handle(bytes, cursor)?;
            let count = read_count(bytes, cursor, 10)?;
            let mut variables = Vec::with_capacity(count);
            for _ in 0..count {
                let var_name = read_handle(bytes, cursor)?;
                let type_id = TypeId(read_u32(bytes, cursor)?);
                let origin = VariableOrigin::from_byte(read_u8(bytes, cursor)?)?;
                let is_reference = read_bool(bytes, cursor)?;
                variables.push(VariableEntry::new(var_name, type_id, origin, is_reference));
            }
            Instruction::DefineLexicalScope {
                name,
                parent: (!parent.is_none()).then_some(parent),
                variables,
            }
        }
        Opcode::DefineStructure => {
            let type_id = TypeId(read_u32(bytes, cursor)?);
            let count = read_count(bytes, cursor, 8)?;
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                let member = read_handle(bytes, cursor)?;
                let member_type = TypeId(read_u32(bytes, cursor)?);
                members.push((member, member_type));
            }
            Instruction::DefineStructure { type_id, members }
        }
        Opcode::SumTypeDef => {
            let type_id = TypeId(read_u32(bytes, cursor)?);
            let count = read_count(bytes, cursor, 4)?;
            let mut bases = Vec::with_capacity(count);
            for _ in 0..count {
                bases.push(TypeId(read_u32(bytes, cursor)?));
            }
            Instruction::SumTypeDef { type_id, bases }
        }
        Opcode::BindRef => {
            let frames = read_u32(bytes, cursor)?;
            let index = read_u32(bytes, cursor)?;
            Instruction::BindRef { frames, index }
        }
        Opcode::BindMemberRef => Instruction::BindMemberRef(read_handle(bytes, cursor)?),
        Opcode::BindMemberByHandle => Instruction::BindMemberByHandle(read_handle(bytes, cursor)?),
        Opcode::CopyFromStructure => {
            let variable = read_handle(bytes, cursor)?;
            let member = read_handle(bytes, cursor)?;
            Instruction::CopyFromStructure { variable, member }
        }
        Opcode::CopyToStructure => {
            let variable = read_handle(bytes, cursor)?;
            let member = read_handle(bytes, cursor)?;
            Instruction::CopyToStructure { variable, member }
        }
        Opcode::CopyBuffer => Instruction::CopyBuffer,
        Opcode::CopyStructure => Instruction::CopyStructure,
        Opcode::ConstructSumType => Instruction::ConstructSumType(read_handle(bytes, cursor)?),
        Opcode::AllocStructure => Instruction::AllocStructure(TypeId(read_u32(bytes, cursor)?)),
        Opcode::PatternMatch => {
            let target = read_handle(bytes, cursor)?;
            let count = read_count(bytes, cursor, 5)?;
            let mut patterns = Vec::with_capacity(count);
            for _ in 0..count {
                let type_id = TypeId(read_u32(bytes, cursor)?);
                let literal = match read_u8(bytes, cursor)? {
                    0 => None,
                    1 => Some(read_literal(type_id, bytes, cursor)?),
                    other => bail!("invalid pattern kind {}", other),
                };
                patterns.push(ParamPattern { type_id, literal });
            }
            Instruction::PatternMatch {
                target,
                entry: None,
                patterns,
            }
        }
        Opcode::TypeMatch => {
            let target = read_handle(bytes, cursor)?;
            let count = read_count(bytes, cursor, 5)?;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                let type_id = TypeId(read_u32(bytes, cursor)?);
                let by_ref = read_bool(bytes, cursor)?;
                params.push(TypeParam { type_id, by_ref });
            }
            Instruction::TypeMatch {
                target,
                entry: None,
                params,
            }
        }
        Opcode::Tag => {
            let target = read_handle(bytes, cursor)?;
            let tag = read_handle(bytes, cursor)?;
            let count = read_count(bytes, cursor, 4)?;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(read_handle(bytes, cursor)?);
            }
            Instruction::Tag { target, tag, params }
        }
        Opcode::TempReferenceFromRegister => Instruction::TempReferenceFromRegister,
    })
}

/// Reads a literal whose width is implied by `type_id`.
fn read_literal(type_id: TypeId, bytes: &[u8], cursor: &mut usize) -> Result<Value> {
    Ok(match type_id {
        TypeId::NOTHING => Value::Nothing,
        TypeId::INTEGER => Value::Integer(read_u32(bytes, cursor)? as i32),
        TypeId::INTEGER16 => Value::Integer16(read_u16(bytes, cursor)? as i16),
        TypeId::INTEGER64 => Value::Integer64(read_u64(bytes, cursor)? as i64),
        TypeId::BOOLEAN => Value::Boolean(read_bool(bytes, cursor)?),
        TypeId::REAL => Value::Real(f32::from_bits(read_u32(bytes, cursor)?)),
        TypeId::STRING => Value::String(read_handle(bytes, cursor)?),
        TypeId::FUNCTION => Value::Function(read_handle(bytes, cursor)?),
        TypeId::IDENTIFIER => Value::Identifier(read_handle(bytes, cursor)?),
        other => bail!("type {} has no literal form", other),
    })
}

/// Reads an element count and checks the stream can hold that many
/// elements of at least `min_width` bytes each.
fn read_count(bytes: &[u8], cursor: &mut usize, min_width: usize) -> Result<usize> {
    let count = read_u32(bytes, cursor)? as usize;
    let remaining = bytes.len() - *cursor;
    if count.saturating_mul(min_width) > remaining {
        bail!("unexpected end of input while reading {} table entries", count);
    }
    Ok(count)
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= bytes.len() {
        bail!("unexpected end of input while reading u8");
    }
    let value = bytes[*cursor];
    *cursor += 1;
    Ok(value)
}

fn read_bool(bytes: &[u8], cursor: &mut usize) -> Result<bool> {
    match read_u8(bytes, cursor)? {
        0 => Ok(false),
        1 => Ok(true),
        other => bail!("invalid boolean byte {}", other),
    }
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    if *cursor + 2 > bytes.len() {
        bail!("unexpected end of input while reading u16");
    }
    let value = u16::from_le_bytes([bytes[*cursor], bytes[*cursor + 1]]);
    *cursor += 2;
    Ok(value)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > bytes.len() {
        bail!("unexpected end of input while reading u32");
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    if *cursor + 8 > bytes.len() {
        bail!("unexpected end of input while reading u64");
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 8]);
    *cursor += 8;
    Ok(u64::from_le_bytes(buf))
}

fn read_handle(bytes: &[u8], cursor: &mut usize) -> Result<StringHandle> {
    Ok(StringHandle(read_u32(bytes, cursor)?))
}

fn read_cstring(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let rest = &bytes[*cursor..];
    let Some(len) = rest.iter().position(|b| *b == 0) else {
        bail!("unexpected end of input while reading string literal");
    };
    let text = std::str::from_utf8(&rest[..len]).context("string literal is not valid UTF-8")?;
    *cursor += len + 1;
    Ok(text.to_string())
}
