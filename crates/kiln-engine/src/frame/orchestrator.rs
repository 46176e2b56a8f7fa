use std::time::Duration;

use crate::binding::{BindingTableHeap, HeapDesc, HeapVisibility};
use crate::command::{CommandBuffer, CommandBufferPool};
use crate::device::RenderDevice;
use crate::error::{CoreError, Result};
use crate::pass::Pass;
use crate::submit::SubmissionQueue;
use crate::sync::{Fence, WaitStatus};

use super::{FrameContext, FrameInfo};

/// Frame loop settings.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Frames the CPU may record ahead of the device.
    pub render_latency: usize,

    /// Upper bound on the wait before a slot is reused.
    ///
    /// `None` waits forever.
    pub wait_timeout: Option<Duration>,

    /// Slots in each per-frame transient binding heap.
    pub transient_heap_capacity: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            render_latency: 2,
            wait_timeout: Some(Duration::from_secs(5)),
            transient_heap_capacity: 1024,
        }
    }
}

#[derive(Debug)]
struct FrameSlot {
    /// Value the slot's last frame signals; 0 when the slot was never used.
    fence_value: u64,
    transient_heap: BindingTableHeap,
}

#[derive(Debug)]
struct OpenFrame {
    info: FrameInfo,
    buffers: Vec<CommandBuffer>,
}

/// Drives the per-frame loop over `render_latency` frame-in-flight slots.
///
/// Per frame: [`begin_frame`](Self::begin_frame) waits until the slot's
/// previous frame retired and rewinds its transient heap,
/// [`record_pass`](Self::record_pass) records each pass into its own command
/// buffer, and [`end_frame`](Self::end_frame) submits them all with the next
/// fence value.
#[derive(Debug)]
pub struct FrameOrchestrator {
    config: FrameConfig,
    fence: Fence,
    slots: Vec<FrameSlot>,
    frame_index: u64,
    current: Option<OpenFrame>,
}

impl FrameOrchestrator {
    pub fn new(device: &RenderDevice, fence: Fence, config: FrameConfig) -> Result<Self> {
        if config.render_latency == 0 {
            return Err(CoreError::protocol("render latency must be at least 1"));
        }

        let slots = (0..config.render_latency)
            .map(|slot| FrameSlot {
                fence_value: 0,
                transient_heap: device.create_heap(HeapDesc {
                    label: format!("frame slot {slot} transient"),
                    capacity: config.transient_heap_capacity,
                    visibility: HeapVisibility::GpuVisible,
                }),
            })
            .collect();

        log::debug!(
            "frame orchestrator: latency {}, fence `{}`",
            config.render_latency,
            fence.label()
        );
        Ok(Self {
            config,
            fence,
            slots,
            frame_index: 0,
            current: None,
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The frame between `begin_frame` and `end_frame`, if any.
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.current.as_ref().map(|open| open.info)
    }

    /// Fence value the last frame recorded in `slot` signals.
    pub fn slot_fence_value(&self, slot: usize) -> Option<u64> {
        self.slots
            .get(slot)
            .map(|s| s.fence_value)
            .filter(|&value| value != 0)
    }

    /// Waits for the slot's previous frame and opens a new one.
    pub fn begin_frame(&mut self) -> Result<FrameInfo> {
        if let Some(open) = &self.current {
            return Err(CoreError::protocol(format!(
                "frame {} is still open",
                open.info.index
            )));
        }

        let slot = (self.frame_index % self.slots.len() as u64) as usize;
        let previous = self.slots[slot].fence_value;
        let waited_for = if previous == 0 {
            None
        } else {
            self.wait_for(previous)?;
            Some(previous)
        };

        self.slots[slot].transient_heap.reset();

        let info = FrameInfo {
            index: self.frame_index,
            slot,
            waited_for,
        };
        log::trace!(
            "frame {} begins in slot {slot} (waited for {waited_for:?})",
            info.index
        );
        self.current = Some(OpenFrame {
            info,
            buffers: Vec::new(),
        });
        Ok(info)
    }

    /// Records `pass` into a fresh command buffer from `pool`.
    ///
    /// The buffer holds the pass's transitions followed by its body. If
    /// recording fails the buffer goes back to `pool` and the frame stays
    /// open without it.
    pub fn record_pass<P: Pass + ?Sized>(
        &mut self,
        pool: &mut CommandBufferPool,
        pass: &P,
    ) -> Result<()> {
        let Some(open) = self.current.as_mut() else {
            return Err(CoreError::protocol(format!(
                "pass `{}` recorded outside a frame",
                pass.label()
            )));
        };
        let frame = FrameContext {
            info: open.info,
            transient_heap: &self.slots[open.info.slot].transient_heap,
        };

        let mut cmd = pool.acquire(pass.label())?;
        let recorded = cmd
            .begin()
            .and_then(|()| pass.barriers().record(&mut cmd))
            .and_then(|()| pass.record(&mut cmd, &frame))
            .and_then(|()| cmd.end());
        if let Err(err) = recorded {
            log::warn!("pass `{}` failed to record: {err}", pass.label());
            pool.release(&cmd)?;
            return Err(err);
        }

        open.buffers.push(cmd);
        Ok(())
    }

    /// Submits the frame's buffers in recording order and returns the fence
    /// value they signal.
    ///
    /// A rejected submission closes the frame anyway; its buffers go back to
    /// `pool` and the slot keeps its previous fence value.
    pub fn end_frame(
        &mut self,
        queue: &mut SubmissionQueue,
        pool: &mut CommandBufferPool,
    ) -> Result<u64> {
        let Some(open) = self.current.take() else {
            return Err(CoreError::protocol("end_frame without begin_frame"));
        };

        let value = queue.next_signal_value(&self.fence);
        if let Err(err) = queue.submit(&open.buffers, &self.fence, value) {
            log::warn!("frame {} was not submitted: {err}", open.info.index);
            for cmd in &open.buffers {
                pool.release(cmd)?;
            }
            return Err(err);
        }

        self.slots[open.info.slot].fence_value = value;
        self.frame_index += 1;
        log::trace!(
            "frame {} submitted {} buffer(s), signals {value}",
            open.info.index,
            open.buffers.len()
        );
        Ok(value)
    }

    /// Blocks until every submitted frame retired.
    pub fn wait_idle(&self) -> Result<()> {
        match self.slots.iter().map(|s| s.fence_value).max() {
            Some(value) if value > 0 => self.wait_for(value),
            _ => Ok(()),
        }
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        let Some(timeout) = self.config.wait_timeout else {
            return self.fence.wait_until_cpu(value);
        };
        match self.fence.wait_timeout(value, timeout)? {
            WaitStatus::Reached => Ok(()),
            WaitStatus::TimedOut => Err(CoreError::Timeout {
                value,
                completed: self.fence.completed_value(),
            }),
        }
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use super::*;
    use crate::binding::{BindingView, ViewKind};
    use crate::pass::PassBarriers;
    use crate::resource::BufferDesc;
    use crate::submit::Completion;

    struct Noop {
        barriers: PassBarriers,
    }

    impl Pass for Noop {
        fn label(&self) -> &str {
            "noop"
        }

        fn barriers(&self) -> &PassBarriers {
            &self.barriers
        }

        fn record(&self, cmd: &mut CommandBuffer, _frame: &FrameContext<'_>) -> Result<()> {
            cmd.dispatch(1, 1, 1)
        }
    }

    fn noop() -> Noop {
        Noop {
            barriers: PassBarriers::default(),
        }
    }

    fn config(timeout: Duration) -> FrameConfig {
        FrameConfig {
            render_latency: 2,
            wait_timeout: Some(timeout),
            transient_heap_capacity: 8,
        }
    }

    #[test]
    fn zero_latency_is_rejected() {
        let device = RenderDevice::headless(Completion::Immediate);
        let config = FrameConfig {
            render_latency: 0,
            ..FrameConfig::default()
        };
        assert!(FrameOrchestrator::new(&device, device.create_fence("frame"), config).is_err());
    }

    #[test]
    fn frame_must_be_open_to_record() {
        let device = RenderDevice::headless(Completion::Immediate);
        let mut queue = device.create_queue("main");
        let mut pool = CommandBufferPool::default();
        let mut frames =
            FrameOrchestrator::new(&device, device.create_fence("frame"), FrameConfig::default())
                .unwrap();

        assert!(frames.record_pass(&mut pool, &noop()).is_err());
        assert!(frames.end_frame(&mut queue, &mut pool).is_err());

        frames.begin_frame().unwrap();
        assert!(frames.begin_frame().is_err());
        frames.record_pass(&mut pool, &noop()).unwrap();
        assert_eq!(frames.end_frame(&mut queue, &mut pool).unwrap(), 1);
    }

    #[test]
    fn stalled_slot_times_out() {
        let device = RenderDevice::headless(Completion::Manual);
        let mut queue = device.create_queue("main");
        let mut pool = CommandBufferPool::default();
        let mut frames = FrameOrchestrator::new(
            &device,
            device.create_fence("frame"),
            config(Duration::from_millis(10)),
        )
        .unwrap();

        for _ in 0..2 {
            frames.begin_frame().unwrap();
            frames.record_pass(&mut pool, &noop()).unwrap();
            frames.end_frame(&mut queue, &mut pool).unwrap();
        }

        assert_eq!(
            frames.begin_frame(),
            Err(CoreError::Timeout {
                value: 1,
                completed: 0
            })
        );
        assert!(frames.current_frame().is_none());
    }

    #[test]
    fn transient_heap_rewinds_per_frame() {
        let device = RenderDevice::headless(Completion::Immediate);
        let mut queue = device.create_queue("main");
        let (buffer, _token) = device
            .create_buffer(BufferDesc {
                label: "ubo".into(),
                size: 16,
                usage: wgpu::BufferUsages::UNIFORM,
            })
            .unwrap();

        struct Binds {
            barriers: PassBarriers,
            view: BindingView,
        }

        impl Pass for Binds {
            fn label(&self) -> &str {
                "binds"
            }

            fn barriers(&self) -> &PassBarriers {
                &self.barriers
            }

            fn record(&self, cmd: &mut CommandBuffer, frame: &FrameContext<'_>) -> Result<()> {
                let heap = frame.transient_heap;
                assert_eq!(heap.allocated(), 0);
                let slot = heap.allocate()?;
                heap.write(slot, self.view.clone())?;
                cmd.set_binding_table(0, heap, slot, 1)
            }
        }

        let pass = Binds {
            barriers: PassBarriers::default(),
            view: BindingView::new(buffer.handle(), ViewKind::Uniform),
        };
        let mut pool = CommandBufferPool::default();
        let mut frames =
            FrameOrchestrator::new(&device, device.create_fence("frame"), FrameConfig::default())
                .unwrap();

        for _ in 0..4 {
            frames.begin_frame().unwrap();
            frames.record_pass(&mut pool, &pass).unwrap();
            frames.end_frame(&mut queue, &mut pool).unwrap();
        }
        frames.wait_idle().unwrap();
        assert_eq!(frames.frame_index(), 4);
    }

    struct Failing {
        barriers: PassBarriers,
    }

    impl Pass for Failing {
        fn label(&self) -> &str {
            "failing"
        }

        fn barriers(&self) -> &PassBarriers {
            &self.barriers
        }

        fn record(&self, cmd: &mut CommandBuffer, _frame: &FrameContext<'_>) -> Result<()> {
            cmd.dispatch(1, 1, 1)?;
            Err(CoreError::protocol("pass gave up"))
        }
    }

    #[test]
    fn failed_pass_does_not_leak_its_buffer() {
        let device = RenderDevice::headless(Completion::Immediate);
        let mut queue = device.create_queue("main");
        let mut pool = CommandBufferPool::new(crate::command::PoolConfig {
            label: "frames".into(),
            max_buffers: 4,
        });
        let mut frames =
            FrameOrchestrator::new(&device, device.create_fence("frame"), FrameConfig::default())
                .unwrap();
        let failing = Failing {
            barriers: PassBarriers::default(),
        };

        for index in 0..40 {
            frames.begin_frame().unwrap();
            if index == 2 {
                assert!(frames.record_pass(&mut pool, &failing).is_err());
            }
            frames.record_pass(&mut pool, &noop()).unwrap();
            frames.end_frame(&mut queue, &mut pool).unwrap();
        }
        frames.wait_idle().unwrap();
        assert!(pool.allocated() <= 3, "allocated {}", pool.allocated());
    }
}
