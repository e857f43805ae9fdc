use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::util::fast_map::{FastHashSet, fast_hash_set_new};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: $name = $name(0);

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_none(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

define_handle!(
    /// Interned string. Function and identifier values are string handles too.
    StringHandle,
    "str"
);
define_handle!(
    /// Raw byte buffer in the buffer heap.
    BufferHandle,
    "buf"
);
define_handle!(
    /// Structure instance in the structure heap.
    StructureHandle,
    "struct"
);

/// Hands out reusable integer IDs for one resource kind.
///
/// ID 0 is never allocated. Released IDs go onto a free list and are handed
/// out again before the counter advances. `reserve` pins an externally chosen
/// ID (the loader uses it for handles embedded in bytecode).
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u32,
    free: Vec<u32>,
    in_use: FastHashSet<u32>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next: 0,
            free: Vec::new(),
            in_use: fast_hash_set_new(),
        }
    }

    pub fn allocate(&mut self) -> Result<u32> {
        while let Some(id) = self.free.pop() {
            if self.in_use.insert(id) {
                return Ok(id);
            }
        }
        loop {
            let Some(candidate) = self.next.checked_add(1) else {
                bail!("handle space exhausted after {} allocations", self.in_use.len());
            };
            self.next = candidate;
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Marks `id` as in use. Returns false when it was already taken.
    pub fn reserve(&mut self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        self.in_use.insert(id)
    }

    pub fn release(&mut self, id: u32) {
        if self.in_use.remove(&id) {
            self.free.push(id);
        }
    }

    #[inline]
    pub fn is_allocated(&self, id: u32) -> bool {
        self.in_use.contains(&id)
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.in_use.len()
    }
}
