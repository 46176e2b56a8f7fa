use crate::binding::BindingTableHeap;
use crate::device::RenderDevice;

/// What passes may touch while they are being constructed.
///
/// Immutable: passes allocate binding slots through the heap's atomic cursor
/// and create resources through the device, but cannot swap either out.
#[derive(Debug, Copy, Clone)]
pub struct BuildContext<'a> {
    pub device: &'a RenderDevice,
    /// Persistent GPU-visible heap for bindings that live as long as the pass.
    pub heap: &'a BindingTableHeap,
}

impl<'a> BuildContext<'a> {
    pub fn new(device: &'a RenderDevice, heap: &'a BindingTableHeap) -> Self {
        Self { device, heap }
    }
}

/// Identity of a frame in flight.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameInfo {
    /// Frames begun before this one.
    pub index: u64,
    /// Frame-in-flight slot, `index % render_latency`.
    pub slot: usize,
    /// Fence value waited on before the slot was reused; `None` on first use.
    pub waited_for: Option<u64>,
}

/// What a pass sees while recording.
#[derive(Debug, Copy, Clone)]
pub struct FrameContext<'a> {
    pub info: FrameInfo,
    /// Per-slot heap, rewound at the start of every frame that uses the slot.
    pub transient_heap: &'a BindingTableHeap,
}
