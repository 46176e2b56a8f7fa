//! Binding tables ("descriptor heaps").
//!
//! Resources are registered into heap slots once; a pass then binds a
//! contiguous range of slots as a unit. Heaps are bump-allocated with a fixed
//! capacity; transient per-frame heaps are rewound wholesale with `reset`.

mod handle;
mod heap;

pub use handle::{BindingHandle, BindingView, ViewKind};
pub use heap::{BindingTableHeap, HeapDesc, HeapVisibility, SLOT_STRIDE};
