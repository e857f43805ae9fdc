use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::heap::StringHandle;

use super::TypeId;

/// Where a scope variable comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VariableOrigin {
    Parameter,
    Local,
    Return,
}

impl VariableOrigin {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(VariableOrigin::Parameter),
            1 => Ok(VariableOrigin::Local),
            2 => Ok(VariableOrigin::Return),
            other => Err(anyhow!("invalid variable origin {}", other)),
        }
    }

    pub const fn as_byte(self) -> u8 {
        match self {
            VariableOrigin::Parameter => 0,
            VariableOrigin::Local => 1,
            VariableOrigin::Return => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VariableEntry {
    pub name: StringHandle,
    pub type_id: TypeId,
    pub origin: VariableOrigin,
    pub is_reference: bool,
}

impl VariableEntry {
    pub fn new(name: StringHandle, type_id: TypeId, origin: VariableOrigin, is_reference: bool) -> Self {
        Self {
            name,
            type_id,
            origin,
            is_reference,
        }
    }
}

/// Static variable layout of a function, block or global scope.
///
/// Parameters keep their declaration order, which is also the order callers
/// push arguments in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeDescription {
    name: StringHandle,
    parent: Option<StringHandle>,
    variables: Vec<VariableEntry>,
}

impl ScopeDescription {
    pub fn new(name: StringHandle, parent: Option<StringHandle>, variables: Vec<VariableEntry>) -> Self {
        Self {
            name,
            parent,
            variables,
        }
    }

    #[inline]
    pub fn name(&self) -> StringHandle {
        self.name
    }

    #[inline]
    pub fn parent(&self) -> Option<StringHandle> {
        self.parent
    }

    #[inline]
    pub fn variables(&self) -> &[VariableEntry] {
        &self.variables
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variable(&self, index: usize) -> Result<&VariableEntry> {
        self.variables
            .get(index)
            .ok_or_else(|| anyhow!("scope {} has no variable at index {}", self.name, index))
    }

    pub fn index_of(&self, name: StringHandle) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &VariableEntry> {
        self.variables.iter().filter(|v| v.origin == VariableOrigin::Parameter)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters().count()
    }

    /// Slot index of the `nth` parameter.
    pub fn parameter_slot(&self, nth: usize) -> Result<usize> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.origin == VariableOrigin::Parameter)
            .nth(nth)
            .map(|(index, _)| index)
            .ok_or_else(|| anyhow!("scope {} has no parameter #{}", self.name, nth))
    }

    pub fn return_variable(&self) -> Option<&VariableEntry> {
        self.variables.iter().find(|v| v.origin == VariableOrigin::Return)
    }
}
