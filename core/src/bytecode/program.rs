use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::heap::{StringHandle, StringPool};
use crate::types::{ScopeDescription, TypeId, TypeTables};
use crate::util::fast_map::{FastHashMap, FastHashSet};
use crate::vm::{NativeEntryPoint, tags};

use super::instruction::Instruction;

/// Native library binding declared by an `external` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalBinding {
    pub library: String,
    pub symbol: String,
}

/// A loaded program: fixed-up instructions plus every table the loader
/// built. Immutable once [`Loader::load`](super::Loader::load) returns it.
pub struct Program {
    pub(crate) code: Vec<Instruction>,
    pub(crate) byte_offsets: Vec<usize>,
    pub(crate) byte_len: usize,
    pub(crate) functions: FastHashMap<StringHandle, usize>,
    pub(crate) entity_ends: FastHashMap<usize, usize>,
    pub(crate) chain_ends: FastHashMap<usize, usize>,
    pub(crate) entity_chains: FastHashMap<usize, usize>,
    pub(crate) scopes: FastHashMap<StringHandle, Arc<ScopeDescription>>,
    pub(crate) types: TypeTables,
    pub(crate) externals: FastHashMap<StringHandle, ExternalBinding>,
    pub(crate) constructors: FastHashSet<StringHandle>,
    pub(crate) native_entries: FastHashMap<StringHandle, NativeEntryPoint>,
    pub(crate) static_strings: FastHashSet<StringHandle>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("instructions", &self.code.len())
            .field("functions", &self.functions.len())
            .field("scopes", &self.scopes.len())
            .field("externals", &self.externals)
            .field("native_entries", &self.native_entries.len())
            .finish_non_exhaustive()
    }
}

impl Program {
    #[inline]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Byte offset instruction `index` was decoded from.
    #[inline]
    pub fn byte_offset(&self, index: usize) -> Option<usize> {
        self.byte_offsets.get(index).copied()
    }

    #[inline]
    pub fn types(&self) -> &TypeTables {
        &self.types
    }

    /// Instruction index of the `BeginEntity` opening function `name`.
    #[inline]
    pub fn function_entry(&self, name: StringHandle) -> Option<usize> {
        self.functions.get(&name).copied()
    }

    pub fn entity_end(&self, begin: usize) -> Result<usize> {
        self.entity_ends
            .get(&begin)
            .copied()
            .ok_or_else(|| anyhow!("no entity begins at instruction {}", begin))
    }

    pub fn chain_end(&self, begin: usize) -> Result<usize> {
        self.chain_ends
            .get(&begin)
            .copied()
            .ok_or_else(|| anyhow!("no chain begins at instruction {}", begin))
    }

    /// `BeginChain` index of the chain directly enclosing the entity at
    /// `entity_begin`.
    #[inline]
    pub fn enclosing_chain(&self, entity_begin: usize) -> Option<usize> {
        self.entity_chains.get(&entity_begin).copied()
    }

    #[inline]
    pub fn scope(&self, name: StringHandle) -> Option<&Arc<ScopeDescription>> {
        self.scopes.get(&name)
    }

    #[inline]
    pub fn external(&self, name: StringHandle) -> Option<&ExternalBinding> {
        self.externals.get(&name)
    }

    #[inline]
    pub fn is_constructor(&self, name: StringHandle) -> bool {
        self.constructors.contains(&name)
    }

    #[inline]
    pub fn native_entry(&self, name: StringHandle) -> Option<&NativeEntryPoint> {
        self.native_entries.get(&name)
    }

    #[inline]
    pub fn static_strings(&self) -> &FastHashSet<StringHandle> {
        &self.static_strings
    }

    /// Serializable overview with names resolved through `pool`.
    pub fn summary(&self, pool: &StringPool) -> Result<ProgramSummary> {
        let name = |handle: StringHandle| -> Result<String> { Ok(pool.get(handle)?.to_string()) };

        let mut functions = Vec::with_capacity(self.functions.len());
        for (handle, entry) in &self.functions {
            let kind = match &self.code[*entry] {
                Instruction::BeginEntity { tag, .. } => tags::describe(*tag),
                _ => "function",
            };
            functions.push(FunctionSummary {
                name: name(*handle)?,
                entry: *entry,
                kind,
                parameters: self.scope(*handle).map(|s| s.parameter_count()).unwrap_or(0),
                native: self.native_entries.contains_key(handle),
                constructor: self.constructors.contains(handle),
            });
        }
        functions.sort_by_key(|f| f.entry);

        let mut externals = Vec::with_capacity(self.externals.len());
        for (handle, binding) in &self.externals {
            externals.push(ExternalSummary {
                name: name(*handle)?,
                library: binding.library.clone(),
                symbol: binding.symbol.clone(),
            });
        }
        externals.sort_by(|a, b| a.name.cmp(&b.name));

        let mut structures = Vec::new();
        for def in self.types.structures() {
            let mut members = Vec::with_capacity(def.members().len());
            for member in def.members() {
                members.push(MemberSummary {
                    name: name(member.name)?,
                    type_id: member.type_id.to_string(),
                    offset: member.offset,
                });
            }
            structures.push(StructureSummary {
                type_id: def.type_id(),
                footprint: def.footprint(),
                members,
            });
        }
        structures.sort_by_key(|s| s.type_id);

        let mut sum_types: Vec<SumTypeSummary> = self
            .types
            .variants()
            .map(|v| SumTypeSummary {
                type_id: v.type_id(),
                bases: v.base_types().iter().map(|(t, _)| t.to_string()).collect(),
            })
            .collect();
        sum_types.sort_by_key(|s| s.type_id);

        Ok(ProgramSummary {
            bytes: self.byte_len,
            instructions: self.code.len(),
            strings: self.static_strings.len(),
            scopes: self.scopes.len(),
            entities: self.entity_ends.len(),
            chains: self.chain_ends.len(),
            functions,
            externals,
            structures,
            sum_types,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramSummary {
    pub bytes: usize,
    pub instructions: usize,
    pub strings: usize,
    pub scopes: usize,
    pub entities: usize,
    pub chains: usize,
    pub functions: Vec<FunctionSummary>,
    pub externals: Vec<ExternalSummary>,
    pub structures: Vec<StructureSummary>,
    pub sum_types: Vec<SumTypeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub entry: usize,
    pub kind: &'static str,
    pub parameters: usize,
    pub native: bool,
    pub constructor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalSummary {
    pub name: String,
    pub library: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureSummary {
    pub type_id: TypeId,
    pub footprint: usize,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub name: String,
    pub type_id: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SumTypeSummary {
    pub type_id: TypeId,
    pub bases: Vec<String>,
}
