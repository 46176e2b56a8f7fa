use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a GPU resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl ResourceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Access mode a resource is valid for at a pass boundary.
///
/// Any state may transition to any other; which transitions are cheap is the
/// hardware's business, not this layer's.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    /// Freshly created; contents undefined.
    Uncommitted,
    /// Generic state usable for CPU-visible access and presentation handoff.
    Common,
    VertexOrUniform,
    IndexBuffer,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderRead,
    UnorderedAccess,
    IndirectArgument,
    CopySource,
    CopyDest,
    Present,
}
