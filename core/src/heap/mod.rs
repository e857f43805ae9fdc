//! Handle-addressed heaps: the string pool, the buffer heap and the structure
//! heap, plus their collectors.

mod buffers;
pub mod gc;
mod handle;
mod strings;
mod structures;


pub use buffers::BufferHeap;
pub use gc::{GcKinds, GcReport, RootSet};
pub use handle::{BufferHandle, HandleAllocator, StringHandle, StructureHandle};
pub use strings::StringPool;
pub use structures::{ActiveStructure, StructureHeap};
