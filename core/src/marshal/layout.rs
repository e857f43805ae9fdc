//! Native memory layout of Epoch structures.
//!
//! Members are packed back to back with no alignment padding. Booleans
//! widen to a 4-byte int; strings, buffers and functions become
//! pointer-sized fields; nested structures are flattened inline.

use std::mem::size_of;

use anyhow::{Result, bail};

use crate::types::{TypeId, TypeTables};

use super::Unsupported;

pub const NATIVE_POINTER_SIZE: usize = size_of::<usize>();
pub const NATIVE_BOOL_SIZE: usize = 4;

/// Size of a scalar or pointer-sized field, `None` for structures and
/// types with no native form.
pub fn native_scalar_size(type_id: TypeId) -> Option<usize> {
    match type_id {
        TypeId::INTEGER | TypeId::REAL => Some(4),
        TypeId::INTEGER16 => Some(2),
        TypeId::INTEGER64 => Some(8),
        TypeId::BOOLEAN => Some(NATIVE_BOOL_SIZE),
        TypeId::STRING | TypeId::BUFFER | TypeId::FUNCTION => Some(NATIVE_POINTER_SIZE),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeField {
    pub offset: usize,
    pub type_id: TypeId,
    pub nested: Option<Box<NativeLayout>>,
}

/// Flattened native layout of one structure type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLayout {
    pub type_id: TypeId,
    pub size: usize,
    pub fields: Vec<NativeField>,
}

impl NativeLayout {
    pub fn of(types: &TypeTables, type_id: TypeId) -> Result<Self> {
        let mut visiting = Vec::new();
        Self::build(types, type_id, &mut visiting)
    }

    fn build(types: &TypeTables, type_id: TypeId, visiting: &mut Vec<TypeId>) -> Result<Self> {
        if visiting.contains(&type_id) {
            bail!(Unsupported(format!("recursive structure {} cannot be flattened", type_id)));
        }
        visiting.push(type_id);
        let definition = types.structure(type_id)?;
        let mut fields = Vec::with_capacity(definition.members().len());
        let mut offset = 0;
        for member in definition.members() {
            let (size, nested) = if member.type_id.is_structure() {
                let nested = Self::build(types, member.type_id, visiting)?;
                (nested.size, Some(Box::new(nested)))
            } else {
                match native_scalar_size(member.type_id) {
                    Some(size) => (size, None),
                    None => bail!(Unsupported(format!("structure member of type {}", member.type_id))),
                }
            };
            fields.push(NativeField {
                offset,
                type_id: member.type_id,
                nested,
            });
            offset += size;
        }
        visiting.pop();
        Ok(Self {
            type_id,
            size: offset,
            fields,
        })
    }
}

pub(crate) fn write_bytes(block: &mut [u8], offset: usize, bytes: &[u8]) {
    block[offset..offset + bytes.len()].copy_from_slice(bytes);
}

pub(crate) fn read_array<const N: usize>(block: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&block[offset..offset + N]);
    out
}
