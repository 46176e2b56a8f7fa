use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::binding::{BindingHandle, BindingTableHeap};
use crate::error::{CoreError, Result};
use crate::pass::Transition;
use crate::resource::{check_copy_alignment, ResourceHandle};
use crate::submit::PipelineId;
use crate::sync::Fence;

use super::{Command, RenderPassDesc};

/// Lifecycle of a command buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CommandBufferState {
    Idle,
    Recording,
    Closed,
    Submitted,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Scope {
    Anywhere,
    InsideRenderPass,
    OutsideRenderPass,
}

pub(crate) struct CommandBufferInner {
    id: u64,
    label: String,
    state: CommandBufferState,
    /// Recording scratch area; capacity is kept across reuse.
    commands: Vec<Command>,
    in_render_pass: bool,
    completion: Option<(Fence, u64)>,
    submissions: u64,
}

impl CommandBufferInner {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn state(&self) -> CommandBufferState {
        self.state
    }

    pub(crate) fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub(crate) fn mark_submitted(&mut self, fence: &Fence, value: u64) {
        self.state = CommandBufferState::Submitted;
        self.completion = Some((fence.clone(), value));
        self.submissions += 1;
    }
}

/// Recorded sequence of GPU operations, submitted as a unit.
///
/// Cloning yields another handle to the same buffer; the pool keeps one while
/// the caller records through another. Recording is only valid between
/// [`CommandBuffer::begin`] and [`CommandBuffer::end`]; after submission the
/// buffer stays read-only until its fence value is reached and the pool hands
/// it out again.
#[derive(Clone)]
pub struct CommandBuffer {
    inner: Arc<Mutex<CommandBufferInner>>,
}

impl CommandBuffer {
    pub(crate) fn new(id: u64, label: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CommandBufferInner {
                id,
                label: label.to_string(),
                state: CommandBufferState::Idle,
                commands: Vec::new(),
                in_render_pass: false,
                completion: None,
                submissions: 0,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.lock().id
    }

    pub fn label(&self) -> String {
        self.lock().label.clone()
    }

    pub fn state(&self) -> CommandBufferState {
        self.lock().state
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the recorded stream.
    pub fn recorded(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Number of times this buffer has been submitted.
    pub fn submissions(&self) -> u64 {
        self.lock().submissions
    }

    /// Returns true when both handles name the same buffer.
    pub fn same_as(&self, other: &CommandBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Clears the scratch area and starts recording. Only valid when idle.
    pub fn begin(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CommandBufferState::Idle {
            return Err(CoreError::protocol(format!(
                "begin on command buffer `{}` in {:?} state",
                inner.label, inner.state
            )));
        }
        inner.commands.clear();
        inner.in_render_pass = false;
        inner.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Stops recording. Any open render pass must be ended first.
    pub fn end(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CommandBufferState::Recording {
            return Err(CoreError::protocol(format!(
                "end on command buffer `{}` in {:?} state",
                inner.label, inner.state
            )));
        }
        if inner.in_render_pass {
            return Err(CoreError::protocol(format!(
                "command buffer `{}` ended inside a render pass",
                inner.label
            )));
        }
        inner.state = CommandBufferState::Closed;
        Ok(())
    }

    pub fn barrier(&mut self, transition: Transition) -> Result<()> {
        self.record(Scope::Anywhere, Command::Barrier(transition))
    }

    pub fn barriers(&mut self, transitions: &[Transition]) -> Result<()> {
        for transition in transitions {
            self.barrier(*transition)?;
        }
        Ok(())
    }

    pub fn begin_render_pass(&mut self, desc: RenderPassDesc) -> Result<()> {
        if desc.color.is_empty() && desc.depth.is_none() {
            return Err(CoreError::protocol(format!(
                "render pass `{}` has no attachments",
                desc.label
            )));
        }
        let attachments = desc
            .color
            .iter()
            .map(|c| &c.target)
            .chain(desc.depth.as_ref().map(|d| &d.target));
        for target in attachments {
            if target.texture_desc().is_none() {
                return Err(CoreError::protocol(format!(
                    "render pass `{}` attaches buffer `{}`",
                    desc.label,
                    target.label()
                )));
            }
        }

        self.record(Scope::OutsideRenderPass, Command::BeginRenderPass(desc))?;
        self.lock().in_render_pass = true;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        self.record(Scope::InsideRenderPass, Command::EndRenderPass)?;
        self.lock().in_render_pass = false;
        Ok(())
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.record(Scope::Anywhere, Command::SetPipeline(pipeline))
    }

    /// Binds `count` slots of `heap` starting at `table` as bind group `index`.
    pub fn set_binding_table(
        &mut self,
        index: u32,
        heap: &BindingTableHeap,
        table: BindingHandle,
        count: u32,
    ) -> Result<()> {
        if !heap.is_gpu_visible() {
            return Err(CoreError::protocol(format!(
                "heap `{}` is CPU-only and cannot be bound",
                heap.label()
            )));
        }
        let views = heap.views(table, count)?;
        self.record(
            Scope::Anywhere,
            Command::SetBindingTable {
                index,
                table,
                views,
            },
        )
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &ResourceHandle) -> Result<()> {
        expect_buffer(buffer)?;
        self.record(
            Scope::InsideRenderPass,
            Command::SetVertexBuffer {
                slot,
                buffer: buffer.clone(),
            },
        )
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: &ResourceHandle,
        format: wgpu::IndexFormat,
    ) -> Result<()> {
        expect_buffer(buffer)?;
        self.record(
            Scope::InsideRenderPass,
            Command::SetIndexBuffer {
                buffer: buffer.clone(),
                format,
            },
        )
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<()> {
        self.record(
            Scope::InsideRenderPass,
            Command::Draw {
                vertices,
                instances,
            },
        )
    }

    pub fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> Result<()> {
        self.record(
            Scope::InsideRenderPass,
            Command::DrawIndexed {
                indices,
                base_vertex,
                instances,
            },
        )
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.record(Scope::OutsideRenderPass, Command::Dispatch { x, y, z })
    }

    pub fn copy_buffer(
        &mut self,
        src: &ResourceHandle,
        src_offset: u64,
        dst: &ResourceHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        expect_buffer(src)?;
        expect_buffer(dst)?;
        if src == dst {
            return Err(CoreError::protocol(format!(
                "copy from `{}` into itself",
                src.label()
            )));
        }
        if size == 0 {
            return Err(CoreError::protocol("empty buffer copy"));
        }
        expect_range(src, src_offset, size)?;
        expect_range(dst, dst_offset, size)?;
        check_copy_alignment(src.label(), src_offset, size)?;
        check_copy_alignment(dst.label(), dst_offset, size)?;

        self.record(
            Scope::OutsideRenderPass,
            Command::CopyBuffer {
                src: src.clone(),
                src_offset,
                dst: dst.clone(),
                dst_offset,
                size,
            },
        )
    }

    /// Copies rows starting at `src_offset` (each `bytes_per_row` apart) into all of `dst`.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &ResourceHandle,
        src_offset: u64,
        bytes_per_row: u32,
        dst: &ResourceHandle,
    ) -> Result<()> {
        expect_buffer(src)?;
        let Some(texture) = dst.texture_desc() else {
            return Err(CoreError::protocol(format!(
                "`{}` is not a texture",
                dst.label()
            )));
        };
        let row_bytes = texture.row_bytes();
        if bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
            return Err(CoreError::protocol(format!(
                "bytes_per_row {bytes_per_row} is not a multiple of {}",
                wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
            )));
        }
        check_copy_alignment(src.label(), src_offset, 0)?;
        if u64::from(bytes_per_row) < row_bytes {
            return Err(CoreError::protocol(format!(
                "bytes_per_row {bytes_per_row} shorter than a row of `{}` ({row_bytes})",
                texture.label
            )));
        }
        let span = u64::from(bytes_per_row) * u64::from(texture.height.saturating_sub(1)) + row_bytes;
        expect_range(src, src_offset, span)?;

        self.record(
            Scope::OutsideRenderPass,
            Command::CopyBufferToTexture {
                src: src.clone(),
                src_offset,
                bytes_per_row,
                dst: dst.clone(),
            },
        )
    }

    /// Tags the buffer with the fence value its submission completes on.
    pub fn set_completion_fence(&self, fence: &Fence, value: u64) {
        self.lock().completion = Some((fence.clone(), value));
    }

    /// True once the attached fence reached the attached value.
    ///
    /// A buffer that never had a fence attached is never complete.
    pub fn completed_execution(&self) -> bool {
        let completion = self.lock().completion.clone();
        match completion {
            Some((fence, value)) => fence.has_reached(value),
            None => false,
        }
    }

    /// Returns a retired buffer to the idle state under a new label.
    pub(crate) fn recycle(&self, label: &str) {
        let mut inner = self.lock();
        inner.label.clear();
        inner.label.push_str(label);
        inner.state = CommandBufferState::Idle;
        inner.in_render_pass = false;
        inner.completion = None;
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CommandBufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&mut self, scope: Scope, command: Command) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CommandBufferState::Recording {
            return Err(CoreError::protocol(format!(
                "{} recorded into `{}` in {:?} state",
                command.name(),
                inner.label,
                inner.state
            )));
        }
        match (scope, inner.in_render_pass) {
            (Scope::InsideRenderPass, false) => {
                return Err(CoreError::protocol(format!(
                    "{} outside a render pass in `{}`",
                    command.name(),
                    inner.label
                )));
            }
            (Scope::OutsideRenderPass, true) => {
                return Err(CoreError::protocol(format!(
                    "{} inside a render pass in `{}`",
                    command.name(),
                    inner.label
                )));
            }
            _ => {}
        }
        inner.commands.push(command);
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CommandBuffer")
            .field("id", &inner.id)
            .field("label", &inner.label)
            .field("state", &inner.state)
            .field("commands", &inner.commands.len())
            .finish()
    }
}

fn expect_buffer(resource: &ResourceHandle) -> Result<()> {
    if resource.is_buffer() {
        Ok(())
    } else {
        Err(CoreError::protocol(format!(
            "`{}` is not a buffer",
            resource.label()
        )))
    }
}

fn expect_range(resource: &ResourceHandle, offset: u64, len: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= resource.size_bytes() => Ok(()),
        _ => Err(CoreError::protocol(format!(
            "range {offset}+{len} outside `{}` ({} bytes)",
            resource.label(),
            resource.size_bytes()
        ))),
    }
}
