use anyhow::{Result, anyhow};
use tracing::debug;

use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new};

use super::handle::{BufferHandle, HandleAllocator};

/// Untyped byte vectors addressed by [`BufferHandle`].
#[derive(Debug, Default)]
pub struct BufferHeap {
    buffers: FastHashMap<BufferHandle, Vec<u8>>,
    allocator: HandleAllocator,
    ticks: usize,
}

impl BufferHeap {
    pub fn new() -> Self {
        Self {
            buffers: fast_hash_map_new(),
            allocator: HandleAllocator::new(),
            ticks: 0,
        }
    }

    /// Allocates `len` zero bytes.
    pub fn allocate(&mut self, len: usize) -> Result<BufferHandle> {
        self.insert(vec![0; len])
    }

    pub fn insert(&mut self, bytes: Vec<u8>) -> Result<BufferHandle> {
        let handle = BufferHandle(self.allocator.allocate()?);
        self.buffers.insert(handle, bytes);
        self.ticks += 1;
        Ok(handle)
    }

    /// Copies the contents of `source` under a fresh handle.
    pub fn clone_buffer(&mut self, source: BufferHandle) -> Result<BufferHandle> {
        let bytes = self.get(source)?.to_vec();
        self.insert(bytes)
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&[u8]> {
        self.buffers
            .get(&handle)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("invalid buffer handle {}", handle))
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Result<&mut Vec<u8>> {
        self.buffers
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("invalid buffer handle {}", handle))
    }

    /// Frees `handle` immediately.
    pub fn discard(&mut self, handle: BufferHandle) {
        if self.buffers.remove(&handle).is_some() {
            self.allocator.release(handle.raw());
        }
    }

    #[inline]
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn garbage_collect(&mut self, live: &FastHashSet<BufferHandle>) -> usize {
        let before = self.buffers.len();
        let allocator = &mut self.allocator;
        self.buffers.retain(|handle, _| {
            let keep = live.contains(handle);
            if !keep {
                allocator.release(handle.raw());
            }
            keep
        });
        self.ticks = 0;
        let freed = before - self.buffers.len();
        debug!(target: "epoch::gc", freed, remaining = self.buffers.len(), "buffer sweep");
        freed
    }
}
