use std::collections::VecDeque;

use crate::error::{CoreError, Result};

use super::{CommandBuffer, CommandBufferState};

/// Settings for a [`CommandBufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub label: String,
    /// Upper bound on buffers the pool will ever allocate.
    pub max_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: "command pool".to_string(),
            max_buffers: 64,
        }
    }
}

/// FIFO-recycling source of command buffers.
///
/// Every buffer handed out is also queued at the back. `acquire` looks only
/// at the front: buffers retire in submission order, so if the oldest is
/// still executing nothing behind it can be free either. A buffer that will
/// never be submitted carries no fence and must be handed back with
/// [`CommandBufferPool::release`], or it blocks the front for good.
#[derive(Debug)]
pub struct CommandBufferPool {
    config: PoolConfig,
    queue: VecDeque<CommandBuffer>,
    /// Released buffers, reused before the queue front.
    free: Vec<CommandBuffer>,
    next_id: u64,
}

impl CommandBufferPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            free: Vec::new(),
            next_id: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Returns an idle buffer labelled `label`: a released one if any, else the
    /// oldest one if its fence value has been reached, else a new one.
    pub fn acquire(&mut self, label: &str) -> Result<CommandBuffer> {
        if let Some(cmd) = self.free.pop() {
            cmd.recycle(label);
            log::trace!(
                "{}: reused released command buffer #{} as `{label}`",
                self.config.label,
                cmd.id()
            );
            self.queue.push_back(cmd.clone());
            return Ok(cmd);
        }

        let reusable = self
            .queue
            .front()
            .is_some_and(CommandBuffer::completed_execution);

        let cmd = if reusable {
            let Some(cmd) = self.queue.pop_front() else {
                return Err(CoreError::protocol("command pool queue emptied underneath"));
            };
            cmd.recycle(label);
            log::trace!(
                "{}: reused command buffer #{} as `{label}`",
                self.config.label,
                cmd.id()
            );
            cmd
        } else {
            if self.len() >= self.config.max_buffers {
                return Err(CoreError::Capacity {
                    what: format!("command pool `{}`", self.config.label),
                    capacity: saturate(self.config.max_buffers),
                    requested: saturate(self.len() + 1),
                });
            }
            let cmd = CommandBuffer::new(self.next_id, label);
            self.next_id += 1;
            log::debug!(
                "{}: allocated command buffer #{} (`{label}`), {} live",
                self.config.label,
                cmd.id(),
                self.queue.len() + 1
            );
            cmd
        };

        self.queue.push_back(cmd.clone());
        Ok(cmd)
    }

    /// Hands back a buffer that will not be submitted.
    ///
    /// The buffer is reset to idle and is the next one `acquire` returns.
    /// Submitted buffers retire through their fence instead.
    pub fn release(&mut self, cmd: &CommandBuffer) -> Result<()> {
        if cmd.state() == CommandBufferState::Submitted {
            return Err(CoreError::protocol(format!(
                "{}: released command buffer `{}` was already submitted",
                self.config.label,
                cmd.label()
            )));
        }
        let Some(index) = self.queue.iter().position(|queued| queued.same_as(cmd)) else {
            return Err(CoreError::protocol(format!(
                "{}: command buffer `{}` is not checked out of this pool",
                self.config.label,
                cmd.label()
            )));
        };
        if let Some(cmd) = self.queue.remove(index) {
            cmd.recycle("");
            log::debug!(
                "{}: command buffer #{} released unsubmitted",
                self.config.label,
                cmd.id()
            );
            self.free.push(cmd);
        }
        Ok(())
    }

    /// Buffers currently owned by the pool.
    pub fn len(&self) -> usize {
        self.queue.len() + self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.free.is_empty()
    }

    /// Total buffers ever created by this pool.
    pub fn allocated(&self) -> u64 {
        self.next_id
    }
}

impl Default for CommandBufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use crate::sync::Fence;

    fn submit(cmd: &mut CommandBuffer, fence: &Fence, value: u64) {
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd.lock().mark_submitted(fence, value);
    }

    #[test]
    fn allocates_until_front_retires() {
        let fence = Fence::new("pool");
        let mut pool = CommandBufferPool::default();

        let mut a = pool.acquire("a").unwrap();
        submit(&mut a, &fence, 1);
        let mut b = pool.acquire("b").unwrap();
        submit(&mut b, &fence, 2);
        assert!(!a.same_as(&b));
        assert_eq!(pool.allocated(), 2);

        fence.signal(1).unwrap();
        let c = pool.acquire("c").unwrap();
        assert!(c.same_as(&a));
        assert_eq!(c.label(), "c");
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn only_the_front_is_considered() {
        let fence_a = Fence::new("a");
        let fence_b = Fence::new("b");
        let mut pool = CommandBufferPool::default();

        let mut a = pool.acquire("a").unwrap();
        submit(&mut a, &fence_a, 1);
        let mut b = pool.acquire("b").unwrap();
        submit(&mut b, &fence_b, 1);

        // b finished first but a still blocks the queue.
        fence_b.signal(1).unwrap();
        let c = pool.acquire("c").unwrap();
        assert!(!c.same_as(&a));
        assert!(!c.same_as(&b));
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut pool = CommandBufferPool::new(PoolConfig {
            label: "tiny".into(),
            max_buffers: 1,
        });
        let _a = pool.acquire("a").unwrap();
        let err = pool.acquire("b").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Capacity {
                capacity: 1,
                requested: 2,
                ..
            }
        ));
    }

    #[test]
    fn released_buffer_is_reused_next() {
        let fence = Fence::new("pool");
        let mut pool = CommandBufferPool::default();

        let mut a = pool.acquire("a").unwrap();
        submit(&mut a, &fence, 1);
        let mut abandoned = pool.acquire("abandoned").unwrap();
        abandoned.begin().unwrap();
        pool.release(&abandoned).unwrap();
        assert_eq!(abandoned.state(), CommandBufferState::Idle);
        assert_eq!(pool.len(), 2);

        let b = pool.acquire("b").unwrap();
        assert!(b.same_as(&abandoned));
        assert_eq!(b.label(), "b");
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn unsubmitted_buffer_does_not_block_recycling() {
        let fence = Fence::new("pool");
        let mut pool = CommandBufferPool::new(PoolConfig {
            label: "small".into(),
            max_buffers: 3,
        });

        for value in 1..=20 {
            if value == 5 {
                let dropped = pool.acquire("dropped").unwrap();
                pool.release(&dropped).unwrap();
            }
            let mut cmd = pool.acquire("frame").unwrap();
            submit(&mut cmd, &fence, value);
            fence.signal(value).unwrap();
        }
        assert!(pool.len() <= 2);
        assert!(pool.allocated() <= 2);
    }

    #[test]
    fn submitted_or_foreign_buffers_cannot_be_released() {
        let fence = Fence::new("pool");
        let mut pool = CommandBufferPool::default();
        let mut other = CommandBufferPool::default();

        let mut a = pool.acquire("a").unwrap();
        submit(&mut a, &fence, 1);
        assert!(pool.release(&a).is_err());

        let foreign = other.acquire("foreign").unwrap();
        assert!(pool.release(&foreign).is_err());
    }
}
