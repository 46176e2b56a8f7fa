use kiln_engine::command::CommandBufferPool;
use kiln_engine::device::{DeviceInit, RenderDevice};
use kiln_engine::pass::BarrierBuilder;
use kiln_engine::resource::{BufferDesc, ResourceState, UploadTarget, upload_buffer};

/// Round-trips bytes through a real adapter; skipped when none is available.
#[test]
fn copy_round_trip_on_wgpu() {
    let Ok(device) = pollster::block_on(RenderDevice::new_wgpu(DeviceInit::default())) else {
        eprintln!("no wgpu adapter; skipping");
        return;
    };
    let mut queue = device.create_queue("main");
    let fence = device.create_fence("main");
    let mut pool = CommandBufferPool::default();

    let (src, token) = device
        .create_buffer(BufferDesc {
            label: "src".into(),
            size: 16,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        })
        .unwrap();
    let (dst, dst_token) = device
        .create_buffer(BufferDesc {
            label: "dst".into(),
            size: 16,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        })
        .unwrap();

    let data: Vec<u8> = (0..16).collect();
    let token = upload_buffer(
        &device,
        &mut queue,
        &fence,
        &mut pool,
        UploadTarget {
            resource: &src.handle(),
            offset: 0,
            token,
        },
        &data,
    )
    .unwrap();

    let mut barriers = BarrierBuilder::new("copy");
    let _src = barriers
        .require(&src.handle(), token, ResourceState::CopySource)
        .unwrap();
    let _dst = barriers
        .require(&dst.handle(), dst_token, ResourceState::CopyDest)
        .unwrap();
    let barriers = barriers.finish();

    let mut cmd = pool.acquire("copy").unwrap();
    cmd.begin().unwrap();
    barriers.record(&mut cmd).unwrap();
    cmd.copy_buffer(&src.handle(), 0, &dst.handle(), 0, 16).unwrap();
    cmd.end().unwrap();

    let value = queue.next_signal_value(&fence);
    queue.submit(&[cmd], &fence, value).unwrap();
    fence.wait_until_cpu(value).unwrap();

    assert_eq!(dst.read(&device, 0, 16).unwrap(), data);
}
