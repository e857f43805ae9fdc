//! Static type model: type identifiers, structure/variant layouts and scope
//! descriptions. Everything in here is built once by the loader and never
//! mutated afterwards.

mod scope;
mod structure;

#[cfg(test)]
mod structure_test;

pub use scope::{ScopeDescription, VariableEntry, VariableOrigin};
pub use structure::{MemberDefinition, StructureDefinition, TypeTables, VariantDefinition};

use std::fmt;

use serde::Serialize;

/// Broad classification of a [`TypeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Primitive,
    Structure,
    SumType,
}

/// Runtime type identifier.
///
/// The top byte selects the family; structures and sum types keep their
/// table index in the low 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const NOTHING: TypeId = TypeId(0);
    pub const INTEGER: TypeId = TypeId(1);
    pub const INTEGER16: TypeId = TypeId(2);
    pub const INTEGER64: TypeId = TypeId(3);
    pub const BOOLEAN: TypeId = TypeId(4);
    pub const REAL: TypeId = TypeId(5);
    pub const STRING: TypeId = TypeId(6);
    pub const BUFFER: TypeId = TypeId(7);
    pub const FUNCTION: TypeId = TypeId(8);
    pub const IDENTIFIER: TypeId = TypeId(9);

    const FAMILY_MASK: u32 = 0xFF00_0000;
    const INDEX_MASK: u32 = 0x00FF_FFFF;
    const STRUCTURE_FAMILY: u32 = 0x0100_0000;
    const SUM_FAMILY: u32 = 0x0200_0000;

    #[inline]
    pub const fn structure(index: u32) -> TypeId {
        TypeId(Self::STRUCTURE_FAMILY | (index & Self::INDEX_MASK))
    }

    #[inline]
    pub const fn sum_type(index: u32) -> TypeId {
        TypeId(Self::SUM_FAMILY | (index & Self::INDEX_MASK))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    pub fn family(self) -> Option<TypeFamily> {
        match self.0 & Self::FAMILY_MASK {
            0 if self.0 <= Self::IDENTIFIER.0 => Some(TypeFamily::Primitive),
            Self::STRUCTURE_FAMILY => Some(TypeFamily::Structure),
            Self::SUM_FAMILY => Some(TypeFamily::SumType),
            _ => None,
        }
    }

    #[inline]
    pub fn is_structure(self) -> bool {
        self.family() == Some(TypeFamily::Structure)
    }

    #[inline]
    pub fn is_sum_type(self) -> bool {
        self.family() == Some(TypeFamily::SumType)
    }

    #[inline]
    pub fn is_primitive(self) -> bool {
        self.family() == Some(TypeFamily::Primitive)
    }

    /// Kinds whose values are string-pool handles.
    #[inline]
    pub fn is_string_like(self) -> bool {
        matches!(self, TypeId::STRING | TypeId::FUNCTION | TypeId::IDENTIFIER)
    }

    /// Byte footprint of a value of this type inside VM storage. Handles and
    /// nested structures occupy one 32-bit word. Sum types have no fixed size
    /// without their variant table and report `None`.
    pub fn storage_size(self) -> Option<usize> {
        match self {
            TypeId::NOTHING => Some(0),
            TypeId::INTEGER | TypeId::REAL => Some(4),
            TypeId::INTEGER16 => Some(2),
            TypeId::INTEGER64 => Some(8),
            TypeId::BOOLEAN => Some(1),
            TypeId::STRING | TypeId::BUFFER | TypeId::FUNCTION | TypeId::IDENTIFIER => Some(4),
            other if other.is_structure() => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TypeId::NOTHING => f.write_str("nothing"),
            TypeId::INTEGER => f.write_str("integer"),
            TypeId::INTEGER16 => f.write_str("integer16"),
            TypeId::INTEGER64 => f.write_str("integer64"),
            TypeId::BOOLEAN => f.write_str("boolean"),
            TypeId::REAL => f.write_str("real"),
            TypeId::STRING => f.write_str("string"),
            TypeId::BUFFER => f.write_str("buffer"),
            TypeId::FUNCTION => f.write_str("function"),
            TypeId::IDENTIFIER => f.write_str("identifier"),
            other => match other.family() {
                Some(TypeFamily::Structure) => write!(f, "structure#{}", other.index()),
                Some(TypeFamily::SumType) => write!(f, "sum#{}", other.index()),
                _ => write!(f, "type(0x{:08x})", other.0),
            },
        }
    }
}
