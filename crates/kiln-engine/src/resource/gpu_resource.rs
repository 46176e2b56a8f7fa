use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::Pod;

use crate::device::RenderDevice;
use crate::error::{CoreError, Result};
use crate::pass::StateToken;

use super::ResourceId;

/// Linear buffer description.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    /// Size in bytes; must be non-zero.
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Single-mip 2D texture description.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureDesc {
    /// Bytes per texel as laid out in tightly packed host memory.
    pub fn bytes_per_texel(&self) -> u32 {
        self.format.block_copy_size(None).unwrap_or(4)
    }

    /// Bytes per tightly packed row.
    pub fn row_bytes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.bytes_per_texel())
    }
}

/// Shape and format metadata of a resource.
#[derive(Debug, Clone)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

impl ResourceDesc {
    pub fn label(&self) -> &str {
        match self {
            Self::Buffer(b) => &b.label,
            Self::Texture(t) => &t.label,
        }
    }

    /// Size of the resource contents in tightly packed bytes.
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Buffer(b) => b.size,
            Self::Texture(t) => t.row_bytes() * u64::from(t.height),
        }
    }
}

/// Backing storage of a resource.
pub(crate) enum ResourceMemory {
    /// Host memory used by the headless device.
    Host(Mutex<Vec<u8>>),
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

impl ResourceMemory {
    pub(crate) fn host(&self) -> Option<MutexGuard<'_, Vec<u8>>> {
        match self {
            Self::Host(bytes) => Some(bytes.lock().unwrap_or_else(PoisonError::into_inner)),
            _ => None,
        }
    }
}

struct ResourceShared {
    id: ResourceId,
    desc: ResourceDesc,
    memory: ResourceMemory,
}

/// Non-owning reference to a resource.
///
/// Passes that only consume a resource hold one of these; the owning pass
/// keeps the [`GpuResource`] and destroys it on teardown.
#[derive(Clone)]
pub struct ResourceHandle {
    shared: Arc<ResourceShared>,
}

impl ResourceHandle {
    #[inline]
    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        self.shared.desc.label()
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.shared.desc
    }

    pub fn size_bytes(&self) -> u64 {
        self.shared.desc.size_bytes()
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.shared.desc, ResourceDesc::Buffer(_))
    }

    pub fn texture_desc(&self) -> Option<&TextureDesc> {
        match &self.shared.desc {
            ResourceDesc::Texture(t) => Some(t),
            ResourceDesc::Buffer(_) => None,
        }
    }

    pub(crate) fn memory(&self) -> &ResourceMemory {
        &self.shared.memory
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.shared.id, self.label())
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for ResourceHandle {}

/// Owning side of a buffer or texture.
///
/// A resource carries no notion of its current access state; that travels
/// between passes as a [`StateToken`].
pub struct GpuResource {
    handle: ResourceHandle,
}

impl GpuResource {
    pub(crate) fn new(desc: ResourceDesc, memory: ResourceMemory) -> (Self, StateToken) {
        let id = ResourceId::next();
        log::debug!("created {id} `{}` ({} bytes)", desc.label(), desc.size_bytes());

        let handle = ResourceHandle {
            shared: Arc::new(ResourceShared { id, desc, memory }),
        };
        (Self { handle }, StateToken::initial(id))
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.handle.id()
    }

    pub fn desc(&self) -> &ResourceDesc {
        self.handle.desc()
    }

    /// Returns a non-owning reference for consumers.
    pub fn handle(&self) -> ResourceHandle {
        self.handle.clone()
    }

    /// Writes `data` at `offset` through the device's upload path.
    ///
    /// Texture writes must start at offset 0 and cover whole rows.
    pub fn write(&self, device: &RenderDevice, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len() as u64)?;

        match self.handle.memory() {
            ResourceMemory::Host(bytes) => {
                let mut bytes = bytes.lock().unwrap_or_else(PoisonError::into_inner);
                let start = offset as usize;
                bytes[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            ResourceMemory::Buffer(buffer) => {
                let queue = device
                    .wgpu_queue()
                    .ok_or_else(|| CoreError::backend("wgpu buffer written through a headless device"))?;
                check_copy_alignment(self.handle.label(), offset, data.len() as u64)?;
                queue.write_buffer(buffer, offset, data);
                Ok(())
            }
            ResourceMemory::Texture(texture) => {
                let queue = device
                    .wgpu_queue()
                    .ok_or_else(|| CoreError::backend("wgpu texture written through a headless device"))?;
                let Some(desc) = self.handle.texture_desc() else {
                    return Err(CoreError::protocol("texture memory without texture desc"));
                };
                if offset != 0 || data.len() as u64 % desc.row_bytes() != 0 {
                    return Err(CoreError::protocol(format!(
                        "texture `{}` writes must start at 0 and cover whole rows",
                        desc.label
                    )));
                }
                let rows = (data.len() as u64 / desc.row_bytes()) as u32;
                queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(desc.row_bytes() as u32),
                        rows_per_image: Some(rows),
                    },
                    wgpu::Extent3d {
                        width: desc.width,
                        height: rows,
                        depth_or_array_layers: 1,
                    },
                );
                Ok(())
            }
        }
    }

    /// Writes a slice of plain-old-data values at `offset`.
    pub fn write_pod<T: Pod>(&self, device: &RenderDevice, offset: u64, data: &[T]) -> Result<()> {
        self.write(device, offset, bytemuck::cast_slice(data))
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// On wgpu this maps the buffer and blocks until the mapping completes, so
    /// the buffer needs `MAP_READ` and must not be in use by pending work the
    /// caller has not waited for. Texture read-back goes through a copy into a
    /// readable buffer instead.
    pub fn read(&self, device: &RenderDevice, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;

        match self.handle.memory() {
            ResourceMemory::Host(bytes) => {
                let bytes = bytes.lock().unwrap_or_else(PoisonError::into_inner);
                let start = offset as usize;
                Ok(bytes[start..start + len as usize].to_vec())
            }
            ResourceMemory::Buffer(buffer) => {
                let wgpu_device = device
                    .wgpu_device()
                    .ok_or_else(|| CoreError::backend("wgpu buffer read through a headless device"))?;
                if offset % wgpu::MAP_ALIGNMENT != 0 || len % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
                    return Err(CoreError::protocol(format!(
                        "read of `{}` at {offset}+{len} must start on {} and span multiples of {} bytes",
                        self.handle.label(),
                        wgpu::MAP_ALIGNMENT,
                        wgpu::COPY_BUFFER_ALIGNMENT
                    )));
                }

                let slice = buffer.slice(offset..offset + len);
                let (tx, rx) = std::sync::mpsc::channel();
                slice.map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result);
                });
                wgpu_device
                    .poll(wgpu::PollType::Wait {
                        submission_index: None,
                        timeout: None,
                    })
                    .map_err(|e| CoreError::backend(format!("device poll failed: {e:?}")))?;
                rx.recv()
                    .map_err(|_| CoreError::backend("buffer map callback dropped"))?
                    .map_err(|e| CoreError::backend(format!("buffer map failed: {e}")))?;

                let data = slice.get_mapped_range().to_vec();
                buffer.unmap();
                Ok(data)
            }
            ResourceMemory::Texture(_) => Err(CoreError::protocol(format!(
                "texture `{}` cannot be mapped; copy it into a buffer first",
                self.handle.label()
            ))),
        }
    }

    /// Releases device memory. Outstanding handles keep the metadata alive
    /// but must not be recorded again.
    pub fn destroy(self) {
        log::debug!("destroying {} `{}`", self.id(), self.handle.label());
        match self.handle.memory() {
            ResourceMemory::Host(_) => {}
            ResourceMemory::Buffer(buffer) => buffer.destroy(),
            ResourceMemory::Texture(texture) => texture.destroy(),
        }
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        let size = self.handle.size_bytes();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(CoreError::protocol(format!(
                "range {offset}+{len} outside `{}` ({size} bytes)",
                self.handle.label()
            ))),
        }
    }
}

impl fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResource")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Buffer copies and writes move whole 4-byte words at 4-byte offsets.
pub(crate) fn check_copy_alignment(label: &str, offset: u64, size: u64) -> Result<()> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    if offset % align != 0 || size % align != 0 {
        return Err(CoreError::protocol(format!(
            "`{label}`: offset {offset} and size {size} must be multiples of {align}"
        )));
    }
    Ok(())
}
