//! Submission: the FIFO queue and the device backends behind it.
//!
//! `SubmissionQueue` validates and orders batches; a [`QueueBackend`] does the
//! device work and posts the fence signal once the batch retires. Two backends
//! exist: [`WgpuQueue`] for real devices and [`HeadlessQueue`], a software
//! executor for host-memory resources whose retirement tests can drive.

mod headless;
mod pipeline;
mod queue;
mod wgpu_queue;

pub use headless::{Completion, HeadlessControl, HeadlessQueue, HeadlessStats};
pub use pipeline::{PipelineId, PipelineRegistry, RegisteredPipeline};
pub use queue::{QueueBackend, SubmissionQueue};
pub use wgpu_queue::{WgpuFenceDriver, WgpuQueue};
