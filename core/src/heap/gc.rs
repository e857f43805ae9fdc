//! Mark-and-sweep collection for the three heap kinds.
//!
//! Marking starts from a [`RootSet`] gathered from one context's scope
//! chain, operand stack and Register. Strings and buffers are additionally
//! kept alive by every structure instance still in the heap; structures are
//! traced transitively from the roots.

use crate::frame::{ActiveScope, Register, StackSpace};
use crate::util::fast_map::{FastHashSet, fast_hash_set_new};
use crate::value::{HeapRef, Value};

use super::buffers::BufferHeap;
use super::handle::{BufferHandle, StringHandle, StructureHandle};
use super::strings::StringPool;
use super::structures::StructureHeap;

/// Which heap kinds a collection pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcKinds {
    pub strings: bool,
    pub buffers: bool,
    pub structures: bool,
}

impl GcKinds {
    pub const ALL: GcKinds = GcKinds {
        strings: true,
        buffers: true,
        structures: true,
    };

    #[inline]
    pub fn any(self) -> bool {
        self.strings || self.buffers || self.structures
    }
}

/// Number of handles freed per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcReport {
    pub strings: usize,
    pub buffers: usize,
    pub structures: usize,
}

#[derive(Debug, Default)]
pub struct RootSet {
    pub strings: FastHashSet<StringHandle>,
    pub buffers: FastHashSet<BufferHandle>,
    pub structures: FastHashSet<StructureHandle>,
}

impl RootSet {
    pub fn new() -> Self {
        Self {
            strings: fast_hash_set_new(),
            buffers: fast_hash_set_new(),
            structures: fast_hash_set_new(),
        }
    }

    /// Collects every handle held by `scopes` (all variable origins), the
    /// operand stack and the Register.
    pub fn gather<'a>(
        scopes: impl IntoIterator<Item = &'a ActiveScope>,
        stack: &StackSpace,
        register: &Register,
    ) -> Self {
        let mut roots = Self::new();
        for scope in scopes {
            for slot in scope.slots() {
                roots.add_value(slot);
            }
        }
        for value in stack.iter() {
            roots.add_value(value);
        }
        if let Some(value) = register.get() {
            roots.add_value(value);
        }
        roots
    }

    pub fn add_value(&mut self, value: &Value) {
        value.visit_handles(&mut |handle| self.add(handle));
    }

    pub fn add(&mut self, handle: HeapRef) {
        match handle {
            HeapRef::String(h) => {
                self.strings.insert(h);
            }
            HeapRef::Buffer(h) => {
                self.buffers.insert(h);
            }
            HeapRef::Structure(h) => {
                self.structures.insert(h);
            }
        }
    }
}

/// Sweeps strings not rooted, not statically referenced by loaded code and
/// not held by any structure instance.
pub fn collect_strings(
    pool: &StringPool,
    roots: &RootSet,
    structures: &StructureHeap,
    statics: &FastHashSet<StringHandle>,
) -> usize {
    let mut live = roots.strings.clone();
    live.extend(statics.iter().copied());
    for (_, instance) in structures.iter() {
        for member in instance.members() {
            member.visit_handles(&mut |handle| {
                if let HeapRef::String(h) = handle {
                    live.insert(h);
                }
            });
        }
    }
    pool.garbage_collect(&live)
}

pub fn collect_buffers(heap: &mut BufferHeap, roots: &RootSet, structures: &StructureHeap) -> usize {
    let mut live = roots.buffers.clone();
    for (_, instance) in structures.iter() {
        for member in instance.members() {
            member.visit_handles(&mut |handle| {
                if let HeapRef::Buffer(h) = handle {
                    live.insert(h);
                }
            });
        }
    }
    heap.garbage_collect(&live)
}

/// Structures reachable from `roots` through structure-typed members.
pub fn reachable_structures(heap: &StructureHeap, roots: &RootSet) -> FastHashSet<StructureHandle> {
    let mut live = fast_hash_set_new();
    let mut pending: Vec<StructureHandle> = roots.structures.iter().copied().collect();
    while let Some(handle) = pending.pop() {
        if !live.insert(handle) {
            continue;
        }
        let Ok(instance) = heap.get(handle) else {
            continue;
        };
        for member in instance.members() {
            member.visit_handles(&mut |nested| {
                if let HeapRef::Structure(h) = nested
                    && !live.contains(&h)
                {
                    pending.push(h);
                }
            });
        }
    }
    live
}

pub fn collect_structures(heap: &mut StructureHeap, roots: &RootSet) -> usize {
    let live = reachable_structures(heap, roots);
    heap.garbage_collect(&live)
}
