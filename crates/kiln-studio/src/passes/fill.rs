use bytemuck::{Pod, Zeroable};
use kiln_engine::Result;
use kiln_engine::binding::{BindingHandle, BindingTableHeap, BindingView, ViewKind};
use kiln_engine::command::CommandBuffer;
use kiln_engine::frame::{BuildContext, FrameContext};
use kiln_engine::pass::{BarrierBuilder, Pass, PassBarriers, StateToken};
use kiln_engine::resource::{ResourceHandle, ResourceState};
use kiln_engine::submit::PipelineId;

pub const WORKGROUP_SIZE: u32 = 64;

/// Uniform block of `fill.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FillParams {
    pub scale: u32,
    pub frame: u32,
    pub len: u32,
    pub _pad: u32,
}

pub struct InputStates {
    pub values: StateToken,
    pub params: StateToken,
}

pub struct OutputStates {
    pub values: StateToken,
    pub params: StateToken,
}

/// Writes `values[i] = i * scale + frame` with a compute dispatch.
pub struct FillPass<'a> {
    heap: &'a BindingTableHeap,
    table: BindingHandle,
    pipeline: PipelineId,
    len: u32,
    barriers: PassBarriers,
}

impl<'a> FillPass<'a> {
    pub fn new(
        ctx: &BuildContext<'a>,
        pipeline: PipelineId,
        values: &ResourceHandle,
        params: &ResourceHandle,
        inputs: InputStates,
    ) -> Result<(Self, OutputStates)> {
        let mut barriers = BarrierBuilder::new("fill");
        let values_token = barriers.require(values, inputs.values, ResourceState::UnorderedAccess)?;
        let params_token = barriers.require(params, inputs.params, ResourceState::VertexOrUniform)?;

        let table = ctx.heap.allocate_range(2)?;
        ctx.heap
            .write(table, BindingView::new(params.clone(), ViewKind::Uniform))?;
        ctx.heap.write(
            table.offset(1),
            BindingView::new(values.clone(), ViewKind::StorageReadWrite),
        )?;

        let pass = Self {
            heap: ctx.heap,
            table,
            pipeline,
            len: (values.size_bytes() / 4) as u32,
            barriers: barriers.finish(),
        };
        let outputs = OutputStates {
            values: values_token,
            params: params_token,
        };
        Ok((pass, outputs))
    }

    pub fn len(&self) -> u32 {
        self.len
    }
}

impl Pass for FillPass<'_> {
    fn label(&self) -> &str {
        "fill"
    }

    fn barriers(&self) -> &PassBarriers {
        &self.barriers
    }

    fn record(&self, cmd: &mut CommandBuffer, _frame: &FrameContext<'_>) -> Result<()> {
        cmd.set_pipeline(self.pipeline)?;
        cmd.set_binding_table(0, self.heap, self.table, 2)?;
        cmd.dispatch(self.len.div_ceil(WORKGROUP_SIZE), 1, 1)
    }
}

/// Builds the compute pipeline for [`FillPass`].
pub fn create_pipeline(device: &wgpu::Device) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("kiln fill shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/fill.wgsl").into()),
    });

    // Auto layout; bind groups are derived from it at submission.
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("kiln fill pipeline"),
        layout: None,
        module: &shader,
        entry_point: Some("cs_main"),
        compilation_options: Default::default(),
        cache: None,
    })
}
