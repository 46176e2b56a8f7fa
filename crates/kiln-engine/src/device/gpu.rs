use anyhow::Context;

use crate::binding::{BindingTableHeap, HeapDesc};
use crate::error::{CoreError, Result};
use crate::pass::StateToken;
use crate::resource::{BufferDesc, GpuResource, ResourceDesc, ResourceMemory, TextureDesc};
use crate::submit::{
    Completion, HeadlessControl, HeadlessQueue, PipelineRegistry, SubmissionQueue, WgpuFenceDriver,
    WgpuQueue,
};
use crate::sync::Fence;

use super::DeviceInit;

enum Backend {
    Wgpu {
        adapter_info: wgpu::AdapterInfo,
        device: wgpu::Device,
        queue: wgpu::Queue,
    },
    Headless {
        completion: Completion,
        control: HeadlessControl,
    },
}

/// Factory for fences, queues, heaps and resources.
///
/// Either wraps a wgpu device (no surface; rendering targets are plain
/// textures) or a headless software device whose resources live in host
/// memory. Everything it creates must be used with the same device.
pub struct RenderDevice {
    label: String,
    backend: Backend,
    pipelines: PipelineRegistry,
}

impl RenderDevice {
    /// Creates a wgpu-backed device.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new_wgpu(init: DeviceInit) -> anyhow::Result<Self> {
        // Use all backends to allow wgpu to select the optimal platform backend.
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(init.label.as_str()),
                required_features: init.required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let adapter_info = adapter.get_info();
        log::info!(
            "device `{}` on {} ({:?})",
            init.label,
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Self {
            label: init.label,
            backend: Backend::Wgpu {
                adapter_info,
                device,
                queue,
            },
            pipelines: PipelineRegistry::new(),
        })
    }

    /// Creates a software device. Submitted work retires per `completion`.
    pub fn headless(completion: Completion) -> Self {
        log::debug!("headless device ({completion:?} completion)");
        Self {
            label: "headless device".to_string(),
            backend: Backend::Headless {
                completion,
                control: HeadlessControl::default(),
            },
            pipelines: PipelineRegistry::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.backend, Backend::Headless { .. })
    }

    pub fn wgpu_device(&self) -> Option<&wgpu::Device> {
        match &self.backend {
            Backend::Wgpu { device, .. } => Some(device),
            Backend::Headless { .. } => None,
        }
    }

    pub fn wgpu_queue(&self) -> Option<&wgpu::Queue> {
        match &self.backend {
            Backend::Wgpu { queue, .. } => Some(queue),
            Backend::Headless { .. } => None,
        }
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        match &self.backend {
            Backend::Wgpu { adapter_info, .. } => Some(adapter_info),
            Backend::Headless { .. } => None,
        }
    }

    /// Retirement control of a headless device.
    pub fn headless_control(&self) -> Option<&HeadlessControl> {
        match &self.backend {
            Backend::Headless { control, .. } => Some(control),
            Backend::Wgpu { .. } => None,
        }
    }

    /// Pipelines usable by queues created from this device.
    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn create_fence(&self, label: impl Into<String>) -> Fence {
        match &self.backend {
            Backend::Wgpu { device, .. } => Fence::with_driver(
                label,
                std::sync::Arc::new(WgpuFenceDriver::new(device.clone())),
            ),
            Backend::Headless { .. } => Fence::new(label),
        }
    }

    pub fn create_queue(&self, label: impl Into<String>) -> SubmissionQueue {
        match &self.backend {
            Backend::Wgpu { device, queue, .. } => SubmissionQueue::new(
                label,
                Box::new(WgpuQueue::new(
                    device.clone(),
                    queue.clone(),
                    self.pipelines.clone(),
                )),
            ),
            Backend::Headless {
                completion,
                control,
            } => SubmissionQueue::new(
                label,
                Box::new(HeadlessQueue::new(*completion, control.clone())),
            ),
        }
    }

    pub fn create_heap(&self, desc: HeapDesc) -> BindingTableHeap {
        BindingTableHeap::new(desc)
    }

    /// Creates a buffer and the token for its initial `Uncommitted` state.
    pub fn create_buffer(&self, desc: BufferDesc) -> Result<(GpuResource, StateToken)> {
        if desc.size == 0 {
            return Err(CoreError::protocol(format!(
                "buffer `{}` has zero size",
                desc.label
            )));
        }

        let memory = match &self.backend {
            Backend::Wgpu { device, .. } => {
                ResourceMemory::Buffer(device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(desc.label.as_str()),
                    size: desc.size,
                    usage: desc.usage,
                    mapped_at_creation: false,
                }))
            }
            Backend::Headless { .. } => host_memory(desc.size)?,
        };
        Ok(GpuResource::new(ResourceDesc::Buffer(desc), memory))
    }

    /// Creates a single-mip 2D texture and the token for its initial state.
    pub fn create_texture(&self, desc: TextureDesc) -> Result<(GpuResource, StateToken)> {
        if desc.width == 0 || desc.height == 0 {
            return Err(CoreError::protocol(format!(
                "texture `{}` has zero extent",
                desc.label
            )));
        }

        let memory = match &self.backend {
            Backend::Wgpu { device, .. } => {
                ResourceMemory::Texture(device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label.as_str()),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: desc.format,
                    usage: desc.usage,
                    view_formats: &[],
                }))
            }
            Backend::Headless { .. } => {
                host_memory(desc.row_bytes() * u64::from(desc.height))?
            }
        };
        Ok(GpuResource::new(ResourceDesc::Texture(desc), memory))
    }
}

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Wgpu { adapter_info, .. } => format!("wgpu ({})", adapter_info.name),
            Backend::Headless { completion, .. } => format!("headless ({completion:?})"),
        };
        f.debug_struct("RenderDevice")
            .field("label", &self.label)
            .field("backend", &backend)
            .finish()
    }
}

fn host_memory(size: u64) -> Result<ResourceMemory> {
    let len = usize::try_from(size)
        .map_err(|_| CoreError::backend(format!("{size} bytes exceed host address space")))?;
    Ok(ResourceMemory::Host(std::sync::Mutex::new(vec![0; len])))
}
