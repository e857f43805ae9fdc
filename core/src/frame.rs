//! Live execution state: activation records, the return-value Register and
//! the operand stack.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail, ensure};

use crate::types::{ScopeDescription, TypeTables};
use crate::value::Value;

/// A live instantiation of a [`ScopeDescription`].
///
/// `parent` is the position of the lexically enclosing scope in the owning
/// context's scope stack. `generation` tells apart scopes that occupy the
/// same position one after another.
#[derive(Debug, Clone)]
pub struct ActiveScope {
    description: Arc<ScopeDescription>,
    parent: Option<usize>,
    generation: u64,
    slots: Vec<Value>,
}

impl ActiveScope {
    /// Creates the scope with every slot zero-initialised for its type.
    pub fn new(description: Arc<ScopeDescription>, parent: Option<usize>, types: &TypeTables) -> Result<Self> {
        let mut slots = Vec::with_capacity(description.len());
        for variable in description.variables() {
            let zero = if variable.is_reference {
                Value::Nothing
            } else {
                types.zero_value(variable.type_id)?
            };
            slots.push(zero);
        }
        Ok(Self {
            description,
            parent,
            generation: 0,
            slots,
        })
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[inline]
    pub fn description(&self) -> &Arc<ScopeDescription> {
        &self.description
    }

    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Result<&Value> {
        self.slots
            .get(index)
            .ok_or_else(|| anyhow!("scope {} has no slot {}", self.description.name(), index))
    }

    pub fn set_slot(&mut self, index: usize, value: Value) -> Result<()> {
        let name = self.description.name();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| anyhow!("scope {} has no slot {}", name, index))?;
        *slot = value;
        Ok(())
    }
}

/// Holds the pending return value of the innermost call.
#[derive(Debug, Clone, Default)]
pub struct Register {
    value: Option<Value>,
}

impl Register {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&mut self, value: Value) {
        self.value = Some(value);
    }

    #[inline]
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[inline]
    pub fn take(&mut self) -> Option<Value> {
        self.value.take()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.value = None;
    }
}

/// Operand stack with a fixed depth limit.
#[derive(Debug, Clone)]
pub struct StackSpace {
    values: Vec<Value>,
    limit: usize,
}

impl StackSpace {
    pub fn new(limit: usize) -> Self {
        Self {
            values: Vec::with_capacity(limit.min(256)),
            limit,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        ensure!(
            self.values.len() < self.limit,
            "operand stack overflow (limit {})",
            self.limit
        );
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.values
            .pop()
            .ok_or_else(|| anyhow!("operand stack underflow"))
    }

    /// Value `depth` slots below the top (0 is the top).
    pub fn peek(&self, depth: usize) -> Result<&Value> {
        let len = self.values.len();
        if depth >= len {
            bail!("operand stack has {} values, cannot read depth {}", len, depth);
        }
        Ok(&self.values[len - 1 - depth])
    }

    /// The top `count` values in push order.
    pub fn top(&self, count: usize) -> Result<&[Value]> {
        let len = self.values.len();
        ensure!(count <= len, "operand stack has {} values, need {}", len, count);
        Ok(&self.values[len - count..])
    }

    pub fn top_mut(&mut self, count: usize) -> Result<&mut [Value]> {
        let len = self.values.len();
        ensure!(count <= len, "operand stack has {} values, need {}", len, count);
        Ok(&mut self.values[len - count..])
    }

    /// Removes the top `count` values, returned in push order.
    pub fn pop_many(&mut self, count: usize) -> Result<Vec<Value>> {
        let len = self.values.len();
        ensure!(count <= len, "operand stack has {} values, need {}", len, count);
        Ok(self.values.split_off(len - count))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}
