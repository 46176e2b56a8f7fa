//! Command recording.
//!
//! A [`CommandBuffer`] records a backend-agnostic [`Command`] stream; the
//! submission queue translates it for whichever backend the device runs on.
//! [`CommandBufferPool`] recycles buffers once their fence value retires.

mod buffer;
mod cmd;
mod pool;

pub use buffer::{CommandBuffer, CommandBufferState};
pub(crate) use buffer::CommandBufferInner;
pub use cmd::{ColorAttachment, Command, DepthAttachment, RenderPassDesc};
pub use pool::{CommandBufferPool, PoolConfig};
