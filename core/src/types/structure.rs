use anyhow::{Context, Result, anyhow, bail, ensure};

use crate::heap::{StringHandle, StructureHandle};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new, fast_hash_map_with_capacity};
use crate::value::{SumValue, Value};

use super::TypeId;

/// Size of the discriminant word stored ahead of every sum-typed payload.
pub const SUM_TAG_SIZE: usize = 4;
/// Nested structures are stored as a handle word.
pub const STRUCTURE_HANDLE_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDefinition {
    pub name: StringHandle,
    pub type_id: TypeId,
    /// Byte offset inside the VM-side footprint. For sum-typed members this
    /// is the offset of the tag word; the payload follows it.
    pub offset: usize,
    /// Structure type of the member when it nests another structure.
    pub nested: Option<TypeId>,
}

/// Static layout of one structure type.
#[derive(Debug, Clone)]
pub struct StructureDefinition {
    type_id: TypeId,
    members: Vec<MemberDefinition>,
    by_name: FastHashMap<StringHandle, usize>,
    footprint: usize,
}

impl StructureDefinition {
    /// Lays out `members` in declaration order. Every member type other than
    /// `type_id` itself must already be known to `tables`.
    pub fn new(type_id: TypeId, members: &[(StringHandle, TypeId)], tables: &TypeTables) -> Result<Self> {
        ensure!(type_id.is_structure(), "{} is not a structure type", type_id);
        let mut laid_out = Vec::with_capacity(members.len());
        let mut by_name = fast_hash_map_with_capacity(members.len());
        let mut offset = 0usize;
        for (index, (name, member_type)) in members.iter().enumerate() {
            if by_name.insert(*name, index).is_some() {
                bail!("duplicate member {} in {}", name, type_id);
            }
            let size = if *member_type == type_id {
                STRUCTURE_HANDLE_SIZE
            } else {
                tables
                    .size_of(*member_type)
                    .with_context(|| format!("laying out member {} of {}", name, type_id))?
            };
            laid_out.push(MemberDefinition {
                name: *name,
                type_id: *member_type,
                offset,
                nested: member_type.is_structure().then_some(*member_type),
            });
            offset += size;
        }
        Ok(Self {
            type_id,
            members: laid_out,
            by_name,
            footprint: offset,
        })
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn members(&self) -> &[MemberDefinition] {
        &self.members
    }

    #[inline]
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    #[inline]
    pub fn member_index(&self, name: StringHandle) -> Option<usize> {
        self.by_name.get(&name).copied()
    }

    pub fn member(&self, index: usize) -> Result<&MemberDefinition> {
        self.members
            .get(index)
            .ok_or_else(|| anyhow!("{} has no member at index {}", self.type_id, index))
    }

    pub fn resolve_member(&self, name: StringHandle) -> Result<(usize, &MemberDefinition)> {
        let index = self
            .member_index(name)
            .ok_or_else(|| anyhow!("{} has no member named {}", self.type_id, name))?;
        Ok((index, &self.members[index]))
    }
}

/// Base types (with their storage sizes) a sum type may hold.
#[derive(Debug, Clone)]
pub struct VariantDefinition {
    type_id: TypeId,
    base_types: Vec<(TypeId, usize)>,
}

impl VariantDefinition {
    pub fn new(type_id: TypeId, bases: &[TypeId], tables: &TypeTables) -> Result<Self> {
        ensure!(type_id.is_sum_type(), "{} is not a sum type", type_id);
        ensure!(!bases.is_empty(), "sum type {} has no base types", type_id);
        let mut base_types = Vec::with_capacity(bases.len());
        for base in bases {
            ensure!(!base.is_sum_type(), "sum type {} nests sum type {}", type_id, base);
            let size = tables
                .size_of(*base)
                .with_context(|| format!("sizing base {} of {}", base, type_id))?;
            base_types.push((*base, size));
        }
        Ok(Self { type_id, base_types })
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn base_types(&self) -> &[(TypeId, usize)] {
        &self.base_types
    }

    pub fn contains(&self, base: TypeId) -> bool {
        self.base_types.iter().any(|(t, _)| *t == base)
    }

    pub fn max_payload_size(&self) -> usize {
        self.base_types.iter().map(|(_, size)| *size).max().unwrap_or(0)
    }

    /// Storage size including the leading tag word.
    pub fn storage_size(&self) -> usize {
        SUM_TAG_SIZE + self.max_payload_size()
    }

    pub fn default_base(&self) -> TypeId {
        self.base_types.first().map(|(t, _)| *t).unwrap_or(TypeId::NOTHING)
    }
}

/// Structure and variant definitions of one loaded program.
#[derive(Debug, Default)]
pub struct TypeTables {
    structures: FastHashMap<TypeId, StructureDefinition>,
    variants: FastHashMap<TypeId, VariantDefinition>,
}

impl TypeTables {
    pub fn new() -> Self {
        Self {
            structures: fast_hash_map_new(),
            variants: fast_hash_map_new(),
        }
    }

    pub fn insert_structure(&mut self, definition: StructureDefinition) -> Result<()> {
        let id = definition.type_id();
        ensure!(!self.structures.contains_key(&id), "structure {} defined twice", id);
        self.structures.insert(id, definition);
        Ok(())
    }

    pub fn insert_variant(&mut self, definition: VariantDefinition) -> Result<()> {
        let id = definition.type_id();
        ensure!(!self.variants.contains_key(&id), "sum type {} defined twice", id);
        self.variants.insert(id, definition);
        Ok(())
    }

    pub fn structure(&self, type_id: TypeId) -> Result<&StructureDefinition> {
        self.structures
            .get(&type_id)
            .ok_or_else(|| anyhow!("no structure definition for {}", type_id))
    }

    pub fn variant(&self, type_id: TypeId) -> Result<&VariantDefinition> {
        self.variants
            .get(&type_id)
            .ok_or_else(|| anyhow!("no sum type definition for {}", type_id))
    }

    pub fn structures(&self) -> impl Iterator<Item = &StructureDefinition> {
        self.structures.values()
    }

    pub fn variants(&self) -> impl Iterator<Item = &VariantDefinition> {
        self.variants.values()
    }

    pub fn size_of(&self, type_id: TypeId) -> Result<usize> {
        if type_id.is_sum_type() {
            return Ok(self.variant(type_id)?.storage_size());
        }
        if type_id.is_structure() {
            // nested structures are stored by handle, but must be declared
            self.structure(type_id)?;
        }
        type_id
            .storage_size()
            .ok_or_else(|| anyhow!("unknown type {}", type_id))
    }

    /// The value a freshly allocated slot of `type_id` holds.
    pub fn zero_value(&self, type_id: TypeId) -> Result<Value> {
        Ok(match type_id {
            TypeId::NOTHING => Value::Nothing,
            TypeId::INTEGER => Value::Integer(0),
            TypeId::INTEGER16 => Value::Integer16(0),
            TypeId::INTEGER64 => Value::Integer64(0),
            TypeId::BOOLEAN => Value::Boolean(false),
            TypeId::REAL => Value::Real(0.0),
            TypeId::STRING => Value::String(StringHandle::NONE),
            TypeId::BUFFER => Value::Buffer(crate::heap::BufferHandle::NONE),
            TypeId::FUNCTION => Value::Function(StringHandle::NONE),
            TypeId::IDENTIFIER => Value::Identifier(StringHandle::NONE),
            other if other.is_structure() => Value::Structure(other, StructureHandle::NONE),
            other if other.is_sum_type() => {
                let base = self.variant(other)?.default_base();
                Value::Sum(SumValue::new(other, base, self.zero_value(base)?))
            }
            other => bail!("cannot zero-initialise unknown type {}", other),
        })
    }
}
