use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opaque reference to a pipeline registered with a [`PipelineRegistry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineId(u32);

impl PipelineId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A pipeline built outside the core and handed over for recording.
#[derive(Debug, Clone)]
pub enum RegisteredPipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

impl RegisteredPipeline {
    /// Layout of bind group `index`, used to build bind groups from binding tables.
    pub fn bind_group_layout(&self, index: u32) -> wgpu::BindGroupLayout {
        match self {
            Self::Render(p) => p.get_bind_group_layout(index),
            Self::Compute(p) => p.get_bind_group_layout(index),
        }
    }
}

/// Shared table of pipelines, indexed by [`PipelineId`].
///
/// Cloning yields another handle to the same table; the device and its wgpu
/// queue backend share one.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    entries: Arc<Mutex<Vec<RegisteredPipeline>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_render(&self, pipeline: wgpu::RenderPipeline) -> PipelineId {
        self.push(RegisteredPipeline::Render(pipeline))
    }

    pub fn register_compute(&self, pipeline: wgpu::ComputePipeline) -> PipelineId {
        self.push(RegisteredPipeline::Compute(pipeline))
    }

    pub fn get(&self, id: PipelineId) -> Option<RegisteredPipeline> {
        self.lock().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, pipeline: RegisteredPipeline) -> PipelineId {
        let mut entries = self.lock();
        let id = PipelineId(u32::try_from(entries.len()).unwrap_or(u32::MAX));
        entries.push(pipeline);
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RegisteredPipeline>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
