use crate::command::CommandBufferPool;
use crate::device::RenderDevice;
use crate::error::{CoreError, Result};
use crate::pass::{BarrierBuilder, StateToken};
use crate::submit::SubmissionQueue;
use crate::sync::Fence;

use super::{check_copy_alignment, BufferDesc, ResourceHandle, ResourceState};

/// Destination of a synchronous upload.
pub struct UploadTarget<'a> {
    pub resource: &'a ResourceHandle,
    pub offset: u64,
    /// Current state of `resource`.
    pub token: StateToken,
}

/// Copies `data` into a buffer through a staging buffer and waits for the copy.
///
/// Records one command buffer from `pool`, submits it with the next value of
/// `fence` and blocks until that value is reached. Returns the destination's
/// token, left in [`ResourceState::CopyDest`].
///
/// `offset` and the length of `data` must be multiples of
/// [`wgpu::COPY_BUFFER_ALIGNMENT`].
pub fn upload_buffer(
    device: &RenderDevice,
    queue: &mut SubmissionQueue,
    fence: &Fence,
    pool: &mut CommandBufferPool,
    target: UploadTarget<'_>,
    data: &[u8],
) -> Result<StateToken> {
    let UploadTarget {
        resource,
        offset,
        token,
    } = target;

    if !resource.is_buffer() {
        return Err(CoreError::protocol(format!(
            "upload_buffer targets texture `{}`",
            resource.label()
        )));
    }
    if data.is_empty() {
        return Err(CoreError::protocol("upload_buffer with no data"));
    }
    check_copy_alignment(resource.label(), offset, data.len() as u64)?;

    let (staging, staging_token) = device.create_buffer(BufferDesc {
        label: format!("{} staging", resource.label()),
        size: data.len() as u64,
        usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
    })?;
    staging.write(device, 0, data)?;

    let mut barriers = BarrierBuilder::new("upload");
    let staging_token = barriers.require(&staging.handle(), staging_token, ResourceState::CopySource)?;
    let token = barriers.require(resource, token, ResourceState::CopyDest)?;
    let barriers = barriers.finish();

    let mut cmd = pool.acquire("upload")?;
    let value = queue.next_signal_value(fence);
    let submitted = cmd
        .begin()
        .and_then(|()| barriers.record(&mut cmd))
        .and_then(|()| cmd.copy_buffer(&staging.handle(), 0, resource, offset, data.len() as u64))
        .and_then(|()| cmd.end())
        .and_then(|()| queue.submit(std::slice::from_ref(&cmd), fence, value));
    if let Err(err) = submitted {
        pool.release(&cmd)?;
        staging.destroy();
        return Err(err);
    }
    fence.wait_until_cpu(value)?;

    drop(staging_token);
    staging.destroy();

    log::debug!(
        "uploaded {} bytes into `{}` (fence value {value})",
        data.len(),
        resource.label()
    );
    Ok(token)
}
