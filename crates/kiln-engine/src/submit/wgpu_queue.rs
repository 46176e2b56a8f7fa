use std::collections::BTreeMap;
use std::time::Duration;

use crate::binding::{BindingView, ViewKind};
use crate::command::{Command, RenderPassDesc};
use crate::error::{CoreError, Result};
use crate::resource::{ResourceHandle, ResourceMemory};
use crate::sync::{FenceDriver, FenceSignal};

use super::{PipelineId, PipelineRegistry, QueueBackend, RegisteredPipeline};

/// Queue backend that translates the command stream into wgpu encoders.
///
/// Each submitted command buffer becomes one `wgpu::CommandBuffer`; a batch
/// goes out in a single `Queue::submit`, and the fence signal rides on
/// `Queue::on_submitted_work_done`. Barriers are only traced: wgpu tracks
/// resource usage itself.
pub struct WgpuQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: PipelineRegistry,
}

/// Pipeline and bind groups bound outside render passes.
#[derive(Default)]
struct Bound {
    pipeline: Option<RegisteredPipeline>,
    tables: BTreeMap<u32, wgpu::BindGroup>,
}

impl WgpuQueue {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, pipelines: PipelineRegistry) -> Self {
        Self {
            device,
            queue,
            pipelines,
        }
    }

    fn encode(&self, commands: &[Command]) -> Result<wgpu::CommandBuffer> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln command buffer"),
            });
        let mut bound = Bound::default();

        let mut i = 0;
        while i < commands.len() {
            match &commands[i] {
                Command::BeginRenderPass(desc) => {
                    let body = &commands[i + 1..];
                    let Some(len) = body
                        .iter()
                        .position(|c| matches!(c, Command::EndRenderPass))
                    else {
                        return Err(CoreError::protocol(format!(
                            "render pass `{}` never ended",
                            desc.label
                        )));
                    };
                    self.encode_render_pass(&mut encoder, desc, &body[..len])?;
                    i += len + 2;
                    continue;
                }
                Command::Barrier(t) => trace_barrier(t),
                Command::SetPipeline(id) => {
                    bound.pipeline = Some(self.pipeline(*id)?);
                    // Bind groups are built against the pipeline's layouts.
                    bound.tables.clear();
                }
                Command::SetBindingTable { index, views, .. } => {
                    let Some(pipeline) = &bound.pipeline else {
                        return Err(CoreError::protocol("binding table set before a pipeline"));
                    };
                    let group = self.build_bind_group(pipeline, *index, views)?;
                    bound.tables.insert(*index, group);
                }
                Command::Dispatch { x, y, z } => {
                    let Some(RegisteredPipeline::Compute(pipeline)) = &bound.pipeline else {
                        return Err(CoreError::protocol("dispatch without a compute pipeline"));
                    };
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("kiln compute"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(pipeline);
                    for (index, group) in &bound.tables {
                        pass.set_bind_group(*index, group, &[]);
                    }
                    pass.dispatch_workgroups(*x, *y, *z);
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    encoder.copy_buffer_to_buffer(
                        buffer_of(src)?,
                        *src_offset,
                        buffer_of(dst)?,
                        *dst_offset,
                        *size,
                    );
                }
                Command::CopyBufferToTexture {
                    src,
                    src_offset,
                    bytes_per_row,
                    dst,
                } => {
                    let (texture, desc) = texture_of(dst)?;
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: buffer_of(src)?,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: *src_offset,
                                bytes_per_row: Some(*bytes_per_row),
                                rows_per_image: Some(desc.height),
                            },
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d {
                            width: desc.width,
                            height: desc.height,
                            depth_or_array_layers: 1,
                        },
                    );
                }
                other => {
                    return Err(CoreError::protocol(format!(
                        "{} outside a render pass",
                        other.name()
                    )));
                }
            }
            i += 1;
        }

        Ok(encoder.finish())
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        desc: &RenderPassDesc,
        body: &[Command],
    ) -> Result<()> {
        let color_views = desc
            .color
            .iter()
            .map(|c| texture_of(&c.target).map(|(t, _)| t.create_view(&Default::default())))
            .collect::<Result<Vec<_>>>()?;
        let depth_view = desc
            .depth
            .as_ref()
            .map(|d| texture_of(&d.target).map(|(t, _)| t.create_view(&Default::default())))
            .transpose()?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = desc
            .color
            .iter()
            .zip(&color_views)
            .map(|(attachment, view)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match attachment.clear {
                            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = match (&desc.depth, &depth_view) {
            (Some(depth), Some(view)) => Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: match depth.clear {
                        Some(value) => wgpu::LoadOp::Clear(value),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            _ => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(desc.label.as_str()),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        let mut pipeline: Option<RegisteredPipeline> = None;
        for command in body {
            match command {
                Command::Barrier(t) => trace_barrier(t),
                Command::SetPipeline(id) => {
                    let registered = self.pipeline(*id)?;
                    let RegisteredPipeline::Render(render) = &registered else {
                        return Err(CoreError::protocol(format!(
                            "compute pipeline {} set inside render pass `{}`",
                            id.raw(),
                            desc.label
                        )));
                    };
                    pass.set_pipeline(render);
                    pipeline = Some(registered);
                }
                Command::SetBindingTable { index, views, .. } => {
                    let Some(current) = &pipeline else {
                        return Err(CoreError::protocol("binding table set before a pipeline"));
                    };
                    let group = self.build_bind_group(current, *index, views)?;
                    pass.set_bind_group(*index, &group, &[]);
                }
                Command::SetVertexBuffer { slot, buffer } => {
                    pass.set_vertex_buffer(*slot, buffer_of(buffer)?.slice(..));
                }
                Command::SetIndexBuffer { buffer, format } => {
                    pass.set_index_buffer(buffer_of(buffer)?.slice(..), *format);
                }
                Command::Draw {
                    vertices,
                    instances,
                } => pass.draw(vertices.clone(), instances.clone()),
                Command::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                other => {
                    return Err(CoreError::protocol(format!(
                        "{} inside render pass `{}`",
                        other.name(),
                        desc.label
                    )));
                }
            }
        }
        Ok(())
    }

    fn build_bind_group(
        &self,
        pipeline: &RegisteredPipeline,
        index: u32,
        views: &[BindingView],
    ) -> Result<wgpu::BindGroup> {
        let layout = pipeline.bind_group_layout(index);

        let texture_views = views
            .iter()
            .map(|view| match view.resource.memory() {
                ResourceMemory::Texture(t) => Some(t.create_view(&Default::default())),
                _ => None,
            })
            .collect::<Vec<_>>();

        let mut entries = Vec::with_capacity(views.len());
        for (binding, (view, texture_view)) in views.iter().zip(&texture_views).enumerate() {
            let resource = match (view.kind, view.resource.memory(), texture_view) {
                (
                    ViewKind::Uniform | ViewKind::StorageRead | ViewKind::StorageReadWrite,
                    ResourceMemory::Buffer(buffer),
                    _,
                ) => buffer.as_entire_binding(),
                (ViewKind::Sampled | ViewKind::StorageTexture, _, Some(texture_view)) => {
                    wgpu::BindingResource::TextureView(texture_view)
                }
                (kind, _, _) => {
                    return Err(CoreError::protocol(format!(
                        "`{}` cannot be bound as {kind:?}",
                        view.resource.label()
                    )));
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kiln binding table"),
            layout: &layout,
            entries: &entries,
        }))
    }

    fn pipeline(&self, id: PipelineId) -> Result<RegisteredPipeline> {
        self.pipelines
            .get(id)
            .ok_or_else(|| CoreError::protocol(format!("unknown pipeline {}", id.raw())))
    }
}

impl QueueBackend for WgpuQueue {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn execute(&mut self, batch: &[&[Command]], signal: FenceSignal) -> Result<()> {
        let buffers = batch
            .iter()
            .map(|commands| self.encode(commands))
            .collect::<Result<Vec<_>>>()?;

        self.queue.submit(buffers);
        self.queue.on_submitted_work_done(move || signal.fire());
        Ok(())
    }
}

/// Pumps wgpu so `on_submitted_work_done` callbacks run while a fence is polled.
pub struct WgpuFenceDriver {
    device: wgpu::Device,
}

impl WgpuFenceDriver {
    pub fn new(device: wgpu::Device) -> Self {
        Self { device }
    }
}

impl FenceDriver for WgpuFenceDriver {
    fn poll(&self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            log::error!("wgpu device poll failed: {err:?}");
        }
    }

    fn wait(&self, timeout: Option<Duration>) {
        let result = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout,
        });
        if let Err(err) = result {
            log::trace!("wgpu device wait returned early: {err:?}");
        }
    }
}

fn trace_barrier(t: &crate::pass::Transition) {
    log::trace!("barrier {}: {:?} -> {:?}", t.resource, t.before, t.after);
}

fn buffer_of(resource: &ResourceHandle) -> Result<&wgpu::Buffer> {
    match resource.memory() {
        ResourceMemory::Buffer(buffer) => Ok(buffer),
        _ => Err(CoreError::backend(format!(
            "`{}` is not a wgpu buffer",
            resource.label()
        ))),
    }
}

fn texture_of(resource: &ResourceHandle) -> Result<(&wgpu::Texture, &crate::resource::TextureDesc)> {
    match (resource.memory(), resource.texture_desc()) {
        (ResourceMemory::Texture(texture), Some(desc)) => Ok((texture, desc)),
        _ => Err(CoreError::backend(format!(
            "`{}` is not a wgpu texture",
            resource.label()
        ))),
    }
}
