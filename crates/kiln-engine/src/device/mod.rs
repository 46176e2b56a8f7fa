//! Device/factory layer.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue, or a headless device
//! - handing out fences, submission queues, binding heaps and resources
//!   bound to that device

mod gpu;
mod init;

pub use gpu::RenderDevice;
pub use init::DeviceInit;
