use crate::resource::ResourceHandle;

/// Address of one slot (or the first of a range) in a binding table heap.
///
/// The GPU address is present only for GPU-visible heaps.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BindingHandle {
    cpu: u64,
    gpu: Option<u64>,
    stride: u64,
}

impl BindingHandle {
    /// The invalid handle.
    pub const NULL: Self = Self {
        cpu: 0,
        gpu: None,
        stride: 0,
    };

    pub(crate) const fn new(cpu: u64, gpu: Option<u64>, stride: u64) -> Self {
        Self { cpu, gpu, stride }
    }

    #[inline]
    pub const fn cpu_address(self) -> u64 {
        self.cpu
    }

    #[inline]
    pub const fn gpu_address(self) -> Option<u64> {
        self.gpu
    }

    #[inline]
    pub const fn stride(self) -> u64 {
        self.stride
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.cpu != 0
    }

    /// Handle `slots` entries further along the same heap.
    #[inline]
    pub fn offset(self, slots: u32) -> Self {
        let delta = u64::from(slots) * self.stride;
        Self {
            cpu: self.cpu + delta,
            gpu: self.gpu.map(|gpu| gpu + delta),
            stride: self.stride,
        }
    }
}

/// How a resource registered in a slot is exposed to shaders.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ViewKind {
    Uniform,
    StorageRead,
    StorageReadWrite,
    Sampled,
    StorageTexture,
}

/// Contents of one binding slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingView {
    pub resource: ResourceHandle,
    pub kind: ViewKind,
}

impl BindingView {
    pub fn new(resource: ResourceHandle, kind: ViewKind) -> Self {
        Self { resource, kind }
    }
}

#[cfg(test)]
mod handle_tests {
    use super::*;

    #[test]
    fn null_is_invalid() {
        assert!(!BindingHandle::NULL.is_valid());
        assert!(!BindingHandle::default().is_valid());
    }

    #[test]
    fn offset_moves_both_addresses() {
        let h = BindingHandle::new(0x1000, Some(0x8000), 32);
        let moved = h.offset(3);
        assert_eq!(moved.cpu_address(), 0x1000 + 96);
        assert_eq!(moved.gpu_address(), Some(0x8000 + 96));
        assert_eq!(moved.stride(), 32);

        let cpu_only = BindingHandle::new(0x2000, None, 32).offset(2);
        assert_eq!(cpu_only.gpu_address(), None);
    }
}
