use anyhow::{Result, anyhow, ensure};
use tracing::debug;

use crate::types::{StructureDefinition, TypeId, TypeTables};
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new};
use crate::value::{SumValue, Value};

use super::buffers::BufferHeap;
use super::handle::{BufferHandle, HandleAllocator, StructureHandle};

/// One structure instance. Members are stored in definition order and keep
/// the type they were zero-initialised with.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStructure {
    type_id: TypeId,
    members: Vec<Value>,
}

impl ActiveStructure {
    pub fn new(definition: &StructureDefinition, types: &TypeTables) -> Result<Self> {
        let members = definition
            .members()
            .iter()
            .map(|member| types.zero_value(member.type_id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            type_id: definition.type_id(),
            members,
        })
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn members(&self) -> &[Value] {
        &self.members
    }

    pub fn read_member(&self, index: usize) -> Result<&Value> {
        self.members
            .get(index)
            .ok_or_else(|| anyhow!("{} has no member {}", self.type_id, index))
    }

    /// Stores `value`, which must have the member's declared type. Sum
    /// members accept only values of their own family.
    pub fn write_member(&mut self, index: usize, value: Value) -> Result<()> {
        let type_id = self.type_id;
        let slot = self
            .members
            .get_mut(index)
            .ok_or_else(|| anyhow!("{} has no member {}", type_id, index))?;
        ensure!(
            slot.type_id() == value.type_id(),
            "member {} of {} is {}, cannot store {}",
            index,
            type_id,
            slot.type_id(),
            value.type_id()
        );
        *slot = value;
        Ok(())
    }
}

/// Everything one [`StructureHeap::deep_copy`] has allocated so far.
#[derive(Default)]
struct CopyState {
    copied: FastHashMap<StructureHandle, StructureHandle>,
    buffers: Vec<BufferHandle>,
}

#[derive(Debug, Default)]
pub struct StructureHeap {
    instances: FastHashMap<StructureHandle, ActiveStructure>,
    allocator: HandleAllocator,
    ticks: usize,
}

impl StructureHeap {
    pub fn new() -> Self {
        Self {
            instances: fast_hash_map_new(),
            allocator: HandleAllocator::new(),
            ticks: 0,
        }
    }

    pub fn allocate(&mut self, instance: ActiveStructure) -> Result<StructureHandle> {
        let handle = StructureHandle(self.allocator.allocate()?);
        self.instances.insert(handle, instance);
        self.ticks += 1;
        Ok(handle)
    }

    pub fn get(&self, handle: StructureHandle) -> Result<&ActiveStructure> {
        self.instances
            .get(&handle)
            .ok_or_else(|| anyhow!("invalid structure handle {}", handle))
    }

    pub fn get_mut(&mut self, handle: StructureHandle) -> Result<&mut ActiveStructure> {
        self.instances
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("invalid structure handle {}", handle))
    }

    /// Frees `handle` immediately.
    pub fn discard(&mut self, handle: StructureHandle) {
        if self.instances.remove(&handle).is_some() {
            self.allocator.release(handle.raw());
        }
    }

    #[inline]
    pub fn contains(&self, handle: StructureHandle) -> bool {
        self.instances.contains_key(&handle)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[inline]
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn iter(&self) -> impl Iterator<Item = (StructureHandle, &ActiveStructure)> {
        self.instances.iter().map(|(h, s)| (*h, s))
    }

    /// Deep-copies `source`. Scalars and string-like handles are copied as
    /// they are, buffers are cloned under new handles and nested structures
    /// are copied recursively. Shared or cyclic sub-structures stay shared or
    /// cyclic in the copy. A failed copy leaves both heaps as they were.
    pub fn deep_copy(&mut self, buffers: &mut BufferHeap, source: StructureHandle) -> Result<StructureHandle> {
        let mut state = CopyState::default();
        match self.copy_instance(buffers, source, &mut state) {
            Ok(copy) => Ok(copy),
            Err(err) => {
                for target in state.copied.values() {
                    self.discard(*target);
                }
                for buffer in state.buffers {
                    buffers.discard(buffer);
                }
                Err(err)
            }
        }
    }

    fn copy_instance(
        &mut self,
        buffers: &mut BufferHeap,
        source: StructureHandle,
        state: &mut CopyState,
    ) -> Result<StructureHandle> {
        if let Some(done) = state.copied.get(&source) {
            return Ok(*done);
        }
        let original = self.get(source)?.clone();
        // reserved up front so cycles back to `source` resolve to the copy
        let target = self.allocate(ActiveStructure {
            type_id: original.type_id,
            members: Vec::new(),
        })?;
        state.copied.insert(source, target);
        let mut members = Vec::with_capacity(original.members.len());
        for member in original.members {
            members.push(self.copy_value(buffers, member, state)?);
        }
        self.get_mut(target)?.members = members;
        Ok(target)
    }

    fn copy_value(&mut self, buffers: &mut BufferHeap, value: Value, state: &mut CopyState) -> Result<Value> {
        Ok(match value {
            Value::Buffer(h) if !h.is_none() => {
                let clone = buffers.clone_buffer(h)?;
                state.buffers.push(clone);
                Value::Buffer(clone)
            }
            Value::Structure(t, h) if !h.is_none() => Value::Structure(t, self.copy_instance(buffers, h, state)?),
            Value::Sum(sum) => {
                let payload = self.copy_value(buffers, *sum.payload, state)?;
                Value::Sum(SumValue::new(sum.family, sum.tag, payload))
            }
            other => other,
        })
    }

    pub fn garbage_collect(&mut self, live: &FastHashSet<StructureHandle>) -> usize {
        let before = self.instances.len();
        let allocator = &mut self.allocator;
        self.instances.retain(|handle, _| {
            let keep = live.contains(handle);
            if !keep {
                allocator.release(handle.raw());
            }
            keep
        });
        self.ticks = 0;
        let freed = before - self.instances.len();
        debug!(target: "epoch::gc", freed, remaining = self.instances.len(), "structure sweep");
        freed
    }
}
