use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new};
use crate::util::lock::lock_heap;

use super::handle::{HandleAllocator, StringHandle};

#[derive(Debug, Default)]
struct PoolInner {
    strings: FastHashMap<StringHandle, Arc<str>>,
    reverse: FastHashMap<Arc<str>, StringHandle>,
    allocator: HandleAllocator,
    ticks: usize,
}

impl PoolInner {
    fn insert(&mut self, handle: StringHandle, text: Arc<str>, dedup: bool) {
        if dedup {
            self.reverse.entry(Arc::clone(&text)).or_insert(handle);
        }
        self.strings.insert(handle, text);
    }
}

/// Interned string storage shared by every context of a VM.
///
/// The pool carries its own lock; callers never wrap it in another mutex.
#[derive(Debug, Default)]
pub struct StringPool {
    inner: Mutex<PoolInner>,
}

impl StringPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                strings: fast_hash_map_new(),
                reverse: fast_hash_map_new(),
                allocator: HandleAllocator::new(),
                ticks: 0,
            }),
        }
    }

    /// Interns `text`, returning the existing handle when equal content is
    /// already pooled.
    pub fn pool(&self, text: &str) -> Result<StringHandle> {
        let mut inner = lock_heap(&self.inner);
        if let Some(handle) = inner.reverse.get(text) {
            return Ok(*handle);
        }
        let handle = StringHandle(inner.allocator.allocate()?);
        inner.insert(handle, Arc::from(text), true);
        inner.ticks += 1;
        Ok(handle)
    }

    /// Stores `text` under a brand-new handle without looking for duplicates.
    pub fn pool_fast(&self, text: &str) -> Result<StringHandle> {
        let mut inner = lock_heap(&self.inner);
        let handle = StringHandle(inner.allocator.allocate()?);
        inner.insert(handle, Arc::from(text), false);
        inner.ticks += 1;
        Ok(handle)
    }

    /// Registers a string under a handle chosen by the bytecode.
    ///
    /// Re-pooling identical content under the same handle is accepted so one
    /// VM can load the same program twice.
    pub fn pool_with_handle(&self, handle: StringHandle, text: &str) -> Result<()> {
        if handle.is_none() {
            bail!("cannot pool string {:?} under the null handle", text);
        }
        let mut inner = lock_heap(&self.inner);
        if !inner.allocator.reserve(handle.raw()) {
            return match inner.strings.get(&handle) {
                Some(existing) if existing.as_ref() == text => Ok(()),
                Some(existing) => Err(anyhow!(
                    "string handle {} already holds {:?}, cannot rebind to {:?}",
                    handle,
                    existing,
                    text
                )),
                None => Err(anyhow!("string handle {} is reserved", handle)),
            };
        }
        inner.insert(handle, Arc::from(text), true);
        Ok(())
    }

    pub fn get(&self, handle: StringHandle) -> Result<Arc<str>> {
        if handle.is_none() {
            return Ok(Arc::from(""));
        }
        lock_heap(&self.inner)
            .strings
            .get(&handle)
            .cloned()
            .ok_or_else(|| anyhow!("invalid string handle {}", handle))
    }

    pub fn find(&self, text: &str) -> Option<StringHandle> {
        lock_heap(&self.inner).reverse.get(text).copied()
    }

    pub fn contains(&self, handle: StringHandle) -> bool {
        lock_heap(&self.inner).strings.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        lock_heap(&self.inner).strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ticks(&self) -> usize {
        lock_heap(&self.inner).ticks
    }

    /// Erases every handle not present in `live` and resets the tick counter.
    /// Returns the number of strings removed.
    pub fn garbage_collect(&self, live: &FastHashSet<StringHandle>) -> usize {
        let mut inner = lock_heap(&self.inner);
        let dead: Vec<StringHandle> = inner
            .strings
            .keys()
            .copied()
            .filter(|handle| !live.contains(handle))
            .collect();
        for handle in &dead {
            if let Some(text) = inner.strings.remove(handle)
                && inner.reverse.get(&text) == Some(handle)
            {
                inner.reverse.remove(&text);
            }
            inner.allocator.release(handle.raw());
        }
        inner.ticks = 0;
        debug!(target: "epoch::gc", freed = dead.len(), remaining = inner.strings.len(), "string sweep");
        dead.len()
    }
}
