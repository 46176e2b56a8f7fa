use crate::command::{Command, CommandBuffer, CommandBufferInner, CommandBufferState};
use crate::error::{CoreError, Result};
use crate::sync::{Fence, FenceSignal};

use std::sync::MutexGuard;

/// Device-side executor behind a [`SubmissionQueue`].
///
/// `execute` receives one command slice per submitted buffer, in submission
/// order, and must arrange for `signal` to fire once all of it has retired.
/// An error means nothing from the batch reached the device.
pub trait QueueBackend: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, batch: &[&[Command]], signal: FenceSignal) -> Result<()>;
}

/// Strictly FIFO submission of closed command buffers.
pub struct SubmissionQueue {
    label: String,
    backend: Box<dyn QueueBackend>,
    submissions: u64,
}

impl SubmissionQueue {
    pub fn new(label: impl Into<String>, backend: Box<dyn QueueBackend>) -> Self {
        Self {
            label: label.into(),
            backend,
            submissions: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Number of successful `submit` calls.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Smallest value `submit` will accept for `fence`.
    pub fn next_signal_value(&self, fence: &Fence) -> u64 {
        fence.target() + 1
    }

    /// Hands `buffers` to the device in order and schedules `fence.signal(value)`
    /// after all of them retire.
    ///
    /// Every buffer must be closed and appear once. `value` must exceed any
    /// value previously scheduled on `fence`. On success each buffer is tagged
    /// with `(fence, value)` for the pool's retirement check.
    pub fn submit(&mut self, buffers: &[CommandBuffer], fence: &Fence, value: u64) -> Result<()> {
        for (i, cmd) in buffers.iter().enumerate() {
            if buffers[..i].iter().any(|other| other.same_as(cmd)) {
                return Err(CoreError::protocol(format!(
                    "command buffer `{}` submitted twice in one batch",
                    cmd.label()
                )));
            }
        }

        let mut guards: Vec<MutexGuard<'_, CommandBufferInner>> =
            buffers.iter().map(CommandBuffer::lock).collect();
        if let Some(open) = guards
            .iter()
            .find(|g| g.state() != CommandBufferState::Closed)
        {
            return Err(CoreError::protocol(format!(
                "command buffer `{}` submitted in {:?} state",
                open.label(),
                open.state()
            )));
        }

        let previous = fence.target();
        fence.schedule(value)?;

        let batch: Vec<&[Command]> = guards.iter().map(|g| g.commands()).collect();
        let executed = self
            .backend
            .execute(&batch, FenceSignal::new(fence.clone(), value));
        drop(batch);
        if let Err(err) = executed {
            fence.retract(value, previous);
            log::error!("{}: submission for `{}` {value} failed: {err}", self.label, fence.label());
            return Err(err);
        }

        for guard in &mut guards {
            guard.mark_submitted(fence, value);
        }
        self.submissions += 1;
        log::trace!(
            "{}: submitted {} buffer(s) via {}, signals `{}` = {value}",
            self.label,
            buffers.len(),
            self.backend.name(),
            fence.label()
        );
        Ok(())
    }

    /// Schedules `fence.signal(value)` behind all work already submitted.
    pub fn signal(&mut self, fence: &Fence, value: u64) -> Result<()> {
        self.submit(&[], fence, value)
    }
}

impl std::fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("label", &self.label)
            .field("backend", &self.backend.name())
            .field("submissions", &self.submissions)
            .finish()
    }
}
