//! GPU resources.
//!
//! A [`GpuResource`] owns device memory plus format/shape metadata. It does not
//! know which access state it is in: passes receive and return that fact as a
//! [`crate::pass::StateToken`].

mod gpu_resource;
mod state;
mod upload;

pub(crate) use gpu_resource::{check_copy_alignment, ResourceMemory};
pub use gpu_resource::{BufferDesc, GpuResource, ResourceDesc, ResourceHandle, TextureDesc};
pub use state::{ResourceId, ResourceState};
pub use upload::{upload_buffer, UploadTarget};
