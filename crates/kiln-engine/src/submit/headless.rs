use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::Command;
use crate::error::{CoreError, Result};
use crate::resource::ResourceHandle;
use crate::sync::FenceSignal;

use super::QueueBackend;

/// When the headless device retires submitted work.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Completion {
    /// Fence signals fire inside `submit`.
    #[default]
    Immediate,
    /// Fence signals queue up until [`HeadlessControl`] retires them.
    Manual,
}

/// Counters of what the headless device executed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct HeadlessStats {
    pub batches: u64,
    pub command_buffers: u64,
    pub barriers: u64,
    pub render_passes: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub copies: u64,
    pub bytes_copied: u64,
}

#[derive(Debug, Default)]
struct HeadlessState {
    pending: VecDeque<FenceSignal>,
    stats: HeadlessStats,
}

/// Test-side handle onto a headless device's retirement queue.
#[derive(Debug, Clone, Default)]
pub struct HeadlessControl {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessControl {
    /// Fence signals waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Values still waiting to fire, oldest first.
    pub fn pending_values(&self) -> Vec<u64> {
        self.lock().pending.iter().map(FenceSignal::value).collect()
    }

    /// Retires the oldest submission and returns the value it signaled.
    pub fn retire_next(&self) -> Option<u64> {
        let signal = self.lock().pending.pop_front()?;
        let value = signal.value();
        signal.fire();
        Some(value)
    }

    /// Retires everything submitted so far.
    pub fn retire_all(&self) -> usize {
        let mut retired = 0;
        while self.retire_next().is_some() {
            retired += 1;
        }
        retired
    }

    pub fn stats(&self) -> HeadlessStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Software queue backend for host-memory resources.
///
/// Copies take effect during `execute`; only the fence signal is deferred in
/// [`Completion::Manual`] mode. Everything else is counted.
#[derive(Debug)]
pub struct HeadlessQueue {
    completion: Completion,
    control: HeadlessControl,
}

impl HeadlessQueue {
    pub fn new(completion: Completion, control: HeadlessControl) -> Self {
        Self {
            completion,
            control,
        }
    }
}

impl QueueBackend for HeadlessQueue {
    fn name(&self) -> &str {
        "headless"
    }

    fn execute(&mut self, batch: &[&[Command]], signal: FenceSignal) -> Result<()> {
        // Nothing is applied unless every command in the batch can be.
        for commands in batch {
            for command in *commands {
                validate(command)?;
            }
        }

        let mut stats = HeadlessStats::default();
        for commands in batch {
            for command in *commands {
                run(command, &mut stats)?;
            }
        }

        {
            let mut state = self.control.lock();
            let total = &mut state.stats;
            total.batches += 1;
            total.command_buffers += batch.len() as u64;
            total.barriers += stats.barriers;
            total.render_passes += stats.render_passes;
            total.draws += stats.draws;
            total.dispatches += stats.dispatches;
            total.copies += stats.copies;
            total.bytes_copied += stats.bytes_copied;

            if self.completion == Completion::Manual {
                state.pending.push_back(signal);
                return Ok(());
            }
        }

        signal.fire();
        Ok(())
    }
}

fn validate(command: &Command) -> Result<()> {
    match command {
        Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => {
            check_host(src, *src_offset, *size)?;
            check_host(dst, *dst_offset, *size)
        }
        Command::CopyBufferToTexture {
            src,
            src_offset,
            bytes_per_row,
            dst,
        } => {
            let Some(texture) = dst.texture_desc() else {
                return Err(CoreError::protocol(format!("`{}` is not a texture", dst.label())));
            };
            let row_bytes = texture.row_bytes();
            let height = u64::from(texture.height);
            let span = u64::from(*bytes_per_row)
                .checked_mul(height.saturating_sub(1))
                .and_then(|rows| rows.checked_add(row_bytes))
                .ok_or_else(|| out_of_range(src, *src_offset, u64::MAX))?;
            check_host(src, *src_offset, span)?;
            check_host(dst, 0, row_bytes * height)
        }
        _ => Ok(()),
    }
}

fn check_host(resource: &ResourceHandle, offset: u64, len: u64) -> Result<()> {
    let Some(bytes) = resource.memory().host() else {
        return Err(not_host(resource));
    };
    match offset.checked_add(len) {
        Some(end) if end <= bytes.len() as u64 => Ok(()),
        _ => Err(out_of_range(resource, offset, len)),
    }
}

fn run(command: &Command, stats: &mut HeadlessStats) -> Result<()> {
    match command {
        Command::Barrier(t) => {
            log::trace!("headless barrier {}: {:?} -> {:?}", t.resource, t.before, t.after);
            stats.barriers += 1;
        }
        Command::BeginRenderPass(_) => stats.render_passes += 1,
        Command::Draw { .. } | Command::DrawIndexed { .. } => stats.draws += 1,
        Command::Dispatch { .. } => stats.dispatches += 1,
        Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => {
            let bytes = read_host(src, *src_offset, *size)?;
            write_host(dst, *dst_offset, &bytes)?;
            stats.copies += 1;
            stats.bytes_copied += size;
        }
        Command::CopyBufferToTexture {
            src,
            src_offset,
            bytes_per_row,
            dst,
        } => {
            let Some(texture) = dst.texture_desc() else {
                return Err(CoreError::protocol(format!("`{}` is not a texture", dst.label())));
            };
            let row_bytes = texture.row_bytes();
            for row in 0..u64::from(texture.height) {
                let src_at = src_offset + row * u64::from(*bytes_per_row);
                let bytes = read_host(src, src_at, row_bytes)?;
                write_host(dst, row * row_bytes, &bytes)?;
            }
            stats.copies += 1;
            stats.bytes_copied += row_bytes * u64::from(texture.height);
        }
        Command::EndRenderPass
        | Command::SetPipeline(_)
        | Command::SetBindingTable { .. }
        | Command::SetVertexBuffer { .. }
        | Command::SetIndexBuffer { .. } => {}
    }
    Ok(())
}

fn read_host(resource: &ResourceHandle, offset: u64, len: u64) -> Result<Vec<u8>> {
    let Some(bytes) = resource.memory().host() else {
        return Err(not_host(resource));
    };
    let start = offset as usize;
    let end = start + len as usize;
    bytes
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| out_of_range(resource, offset, len))
}

fn write_host(resource: &ResourceHandle, offset: u64, data: &[u8]) -> Result<()> {
    let Some(mut bytes) = resource.memory().host() else {
        return Err(not_host(resource));
    };
    let start = offset as usize;
    let end = start + data.len();
    match bytes.get_mut(start..end) {
        Some(slot) => {
            slot.copy_from_slice(data);
            Ok(())
        }
        None => Err(out_of_range(resource, offset, data.len() as u64)),
    }
}

fn not_host(resource: &ResourceHandle) -> CoreError {
    CoreError::backend(format!(
        "`{}` is not host memory; it belongs to another device",
        resource.label()
    ))
}

fn out_of_range(resource: &ResourceHandle, offset: u64, len: u64) -> CoreError {
    CoreError::backend(format!(
        "copy range {offset}+{len} outside `{}`",
        resource.label()
    ))
}

#[cfg(test)]
mod headless_tests {
    use super::*;
    use crate::device::RenderDevice;
    use crate::resource::BufferDesc;
    use crate::sync::Fence;

    #[test]
    fn immediate_mode_signals_during_execute() {
        let control = HeadlessControl::default();
        let mut queue = HeadlessQueue::new(Completion::Immediate, control.clone());
        let fence = Fence::new("test");
        fence.schedule(1).unwrap();

        queue.execute(&[], FenceSignal::new(fence.clone(), 1)).unwrap();
        assert!(fence.has_reached(1));
        assert_eq!(control.pending(), 0);
        assert_eq!(control.stats().batches, 1);
    }

    #[test]
    fn manual_mode_retires_in_order() {
        let control = HeadlessControl::default();
        let mut queue = HeadlessQueue::new(Completion::Manual, control.clone());
        let fence = Fence::new("test");
        for v in 1..=3 {
            fence.schedule(v).unwrap();
            queue.execute(&[], FenceSignal::new(fence.clone(), v)).unwrap();
        }

        assert_eq!(control.pending_values(), vec![1, 2, 3]);
        assert_eq!(fence.completed_value(), 0);
        assert_eq!(control.retire_next(), Some(1));
        assert!(fence.has_reached(1));
        assert!(!fence.has_reached(2));
        assert_eq!(control.retire_all(), 2);
        assert_eq!(fence.completed_value(), 3);
        assert_eq!(control.retire_next(), None);
    }

    #[test]
    fn counts_commands() {
        let control = HeadlessControl::default();
        let mut queue = HeadlessQueue::new(Completion::Immediate, control.clone());
        let fence = Fence::new("test");
        fence.schedule(1).unwrap();

        let first = [Command::Dispatch { x: 1, y: 1, z: 1 }];
        let second = [
            Command::Dispatch { x: 2, y: 1, z: 1 },
            Command::Dispatch { x: 4, y: 1, z: 1 },
        ];
        queue
            .execute(&[&first[..], &second[..]], FenceSignal::new(fence, 1))
            .unwrap();

        let stats = control.stats();
        assert_eq!(stats.command_buffers, 2);
        assert_eq!(stats.dispatches, 3);
    }

    #[test]
    fn failing_batch_leaves_memory_untouched() {
        let device = RenderDevice::headless(Completion::Immediate);
        let buffer = |label: &str, size| {
            let (buffer, _token) = device
                .create_buffer(BufferDesc {
                    label: label.into(),
                    size,
                    usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                })
                .unwrap();
            buffer
        };
        let src = buffer("src", 8);
        let dst = buffer("dst", 8);
        src.write(&device, 0, &[9; 8]).unwrap();

        let good = [Command::CopyBuffer {
            src: src.handle(),
            src_offset: 0,
            dst: dst.handle(),
            dst_offset: 0,
            size: 8,
        }];
        let bad = [Command::CopyBuffer {
            src: src.handle(),
            src_offset: 0,
            dst: dst.handle(),
            dst_offset: 4,
            size: 8,
        }];

        let control = HeadlessControl::default();
        let mut queue = HeadlessQueue::new(Completion::Immediate, control.clone());
        let fence = Fence::new("test");
        fence.schedule(1).unwrap();
        assert!(queue
            .execute(&[&good[..], &bad[..]], FenceSignal::new(fence.clone(), 1))
            .is_err());

        assert_eq!(dst.read(&device, 0, 8).unwrap(), vec![0; 8]);
        assert_eq!(control.stats(), HeadlessStats::default());
        assert!(!fence.has_reached(1));
    }
}
