use std::ops::Range;

use crate::binding::{BindingHandle, BindingView};
use crate::pass::Transition;
use crate::resource::ResourceHandle;
use crate::submit::PipelineId;

/// Backend-agnostic recorded operation.
///
/// Extending the stream:
/// - add a variant here
/// - add a recording method on `CommandBuffer` that validates it
/// - teach each backend under `submit` to execute it
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(Transition),
    BeginRenderPass(RenderPassDesc),
    EndRenderPass,
    SetPipeline(PipelineId),
    /// Binds a slot range of a GPU-visible heap; views are captured at record time.
    SetBindingTable {
        index: u32,
        table: BindingHandle,
        views: Vec<BindingView>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: ResourceHandle,
    },
    SetIndexBuffer {
        buffer: ResourceHandle,
        format: wgpu::IndexFormat,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: ResourceHandle,
        src_offset: u64,
        dst: ResourceHandle,
        dst_offset: u64,
        size: u64,
    },
    /// Copies whole rows from a buffer into the full extent of a texture.
    CopyBufferToTexture {
        src: ResourceHandle,
        src_offset: u64,
        bytes_per_row: u32,
        dst: ResourceHandle,
    },
}

impl Command {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier(_) => "barrier",
            Self::BeginRenderPass(_) => "begin_render_pass",
            Self::EndRenderPass => "end_render_pass",
            Self::SetPipeline(_) => "set_pipeline",
            Self::SetBindingTable { .. } => "set_binding_table",
            Self::SetVertexBuffer { .. } => "set_vertex_buffer",
            Self::SetIndexBuffer { .. } => "set_index_buffer",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw_indexed",
            Self::Dispatch { .. } => "dispatch",
            Self::CopyBuffer { .. } => "copy_buffer",
            Self::CopyBufferToTexture { .. } => "copy_buffer_to_texture",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub target: ResourceHandle,
    /// Clear color (linear RGBA); `None` loads existing contents.
    pub clear: Option<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachment {
    pub target: ResourceHandle,
    pub clear: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub label: String,
    pub color: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
}
