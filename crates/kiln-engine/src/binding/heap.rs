use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{CoreError, Result};

use super::{BindingHandle, BindingView};

/// Size of one slot in the heap's address space.
pub const SLOT_STRIDE: u64 = 32;

const ADDRESS_ALIGN: u64 = 4096;

static NEXT_CPU_BASE: AtomicU64 = AtomicU64::new(0x0000_0001_0000_0000);
static NEXT_GPU_BASE: AtomicU64 = AtomicU64::new(0x0000_8000_0000_0000);

/// Who can see a heap's slots.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeapVisibility {
    /// Staging slots, copied into a GPU-visible heap before use.
    CpuOnly,
    /// Slots bound directly during draw/dispatch.
    GpuVisible,
}

#[derive(Debug, Clone)]
pub struct HeapDesc {
    pub label: String,
    pub capacity: u32,
    pub visibility: HeapVisibility,
}

/// Fixed-capacity, bump-allocated table of binding slots.
///
/// Allocation takes `&self` (the cursor is atomic) so pass constructors can
/// share a heap through an immutable build context. [`BindingTableHeap::reset`]
/// needs exclusive access. The heap never grows.
#[derive(Debug)]
pub struct BindingTableHeap {
    label: String,
    visibility: HeapVisibility,
    capacity: u32,
    cpu_base: u64,
    gpu_base: Option<u64>,
    cursor: AtomicU32,
    slots: Mutex<Vec<Option<BindingView>>>,
}

fn reserve_range(next: &AtomicU64, capacity: u32) -> u64 {
    let span = (u64::from(capacity) + 1) * SLOT_STRIDE;
    let span = span.div_ceil(ADDRESS_ALIGN) * ADDRESS_ALIGN;
    next.fetch_add(span, Ordering::Relaxed)
}

impl BindingTableHeap {
    pub fn new(desc: HeapDesc) -> Self {
        let cpu_base = reserve_range(&NEXT_CPU_BASE, desc.capacity);
        let gpu_base = match desc.visibility {
            HeapVisibility::GpuVisible => Some(reserve_range(&NEXT_GPU_BASE, desc.capacity)),
            HeapVisibility::CpuOnly => None,
        };

        log::debug!(
            "binding heap `{}`: {} slots, {:?}",
            desc.label,
            desc.capacity,
            desc.visibility
        );

        Self {
            label: desc.label,
            visibility: desc.visibility,
            capacity: desc.capacity,
            cpu_base,
            gpu_base,
            cursor: AtomicU32::new(0),
            slots: Mutex::new(vec![None; desc.capacity as usize]),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn visibility(&self) -> HeapVisibility {
        self.visibility
    }

    pub fn is_gpu_visible(&self) -> bool {
        self.visibility == HeapVisibility::GpuVisible
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots handed out since the last reset.
    pub fn allocated(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.allocated()
    }

    /// Handle of slot 0.
    pub fn first_slot(&self) -> BindingHandle {
        self.handle_at(0)
    }

    /// Allocates one slot.
    pub fn allocate(&self) -> Result<BindingHandle> {
        self.allocate_range(1)
    }

    /// Allocates `count` contiguous slots and returns the first.
    pub fn allocate_range(&self, count: u32) -> Result<BindingHandle> {
        if count == 0 {
            return Err(CoreError::protocol(format!(
                "heap `{}`: empty allocation",
                self.label
            )));
        }

        let capacity = self.capacity;
        let start = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                cursor.checked_add(count).filter(|&end| end <= capacity)
            })
            .map_err(|cursor| CoreError::Capacity {
                what: format!("binding heap `{}`", self.label),
                capacity,
                requested: cursor.saturating_add(count),
            })?;

        Ok(self.handle_at(start))
    }

    /// Registers `view` in an allocated slot.
    pub fn write(&self, handle: BindingHandle, view: BindingView) -> Result<()> {
        let index = self.slot_index(handle)?;
        self.lock_slots()[index as usize] = Some(view);
        Ok(())
    }

    pub fn view(&self, handle: BindingHandle) -> Option<BindingView> {
        let index = self.slot_index(handle).ok()?;
        self.lock_slots()[index as usize].clone()
    }

    /// Views of `count` slots starting at `handle`; every slot must be populated.
    pub fn views(&self, handle: BindingHandle, count: u32) -> Result<Vec<BindingView>> {
        let first = self.range_start(handle, count)?;
        let slots = self.lock_slots();

        (first..first + count)
            .map(|index| {
                slots[index as usize].clone().ok_or_else(|| {
                    CoreError::protocol(format!("heap `{}`: slot {index} is empty", self.label))
                })
            })
            .collect()
    }

    /// Copies `count` slots from `src` in `source` into `dst` in this heap.
    ///
    /// This is how staged views in a CPU-only heap reach a GPU-visible one.
    pub fn copy_from(
        &self,
        dst: BindingHandle,
        source: &BindingTableHeap,
        src: BindingHandle,
        count: u32,
    ) -> Result<()> {
        let dst_first = self.range_start(dst, count)?;
        let src_first = source.range_start(src, count)?;

        let copied: Vec<Option<BindingView>> = {
            let src_slots = source.lock_slots();
            src_slots[src_first as usize..(src_first + count) as usize].to_vec()
        };

        let mut dst_slots = self.lock_slots();
        for (slot, view) in dst_slots[dst_first as usize..].iter_mut().zip(copied) {
            *slot = view;
        }
        Ok(())
    }

    /// Returns true when `handle` points into this heap's address range.
    pub fn contains(&self, handle: BindingHandle) -> bool {
        let end = self.cpu_base + u64::from(self.capacity) * SLOT_STRIDE;
        handle.cpu_address() >= self.cpu_base
            && handle.cpu_address() < end
            && (handle.cpu_address() - self.cpu_base) % SLOT_STRIDE == 0
    }

    /// Invalidates every slot and rewinds the cursor.
    pub fn reset(&mut self) {
        *self.cursor.get_mut() = 0;
        self.slots
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .fill(None);
        log::trace!("binding heap `{}` reset", self.label);
    }

    fn handle_at(&self, index: u32) -> BindingHandle {
        let delta = u64::from(index) * SLOT_STRIDE;
        BindingHandle::new(
            self.cpu_base + delta,
            self.gpu_base.map(|gpu| gpu + delta),
            SLOT_STRIDE,
        )
    }

    fn slot_index(&self, handle: BindingHandle) -> Result<u32> {
        self.range_start(handle, 1)
    }

    fn range_start(&self, handle: BindingHandle, count: u32) -> Result<u32> {
        if !self.contains(handle) {
            return Err(CoreError::protocol(format!(
                "handle {:#x} is not a slot of heap `{}`",
                handle.cpu_address(),
                self.label
            )));
        }
        let first = ((handle.cpu_address() - self.cpu_base) / SLOT_STRIDE) as u32;
        let allocated = self.allocated();
        match first.checked_add(count) {
            Some(end) if end <= allocated => Ok(first),
            _ => Err(CoreError::protocol(format!(
                "heap `{}`: slots {first}..{} not allocated ({allocated} in use)",
                self.label,
                first.saturating_add(count)
            ))),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<Option<BindingView>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
