//! Headless demo frame loop.
//!
//! Fills a storage buffer on the GPU every frame, copies it into a mappable
//! buffer, and checks the last frame's contents once the device is idle.

mod passes;

use anyhow::{Context, Result, ensure};
use kiln_engine::binding::{HeapDesc, HeapVisibility};
use kiln_engine::command::{CommandBufferPool, PoolConfig};
use kiln_engine::device::{DeviceInit, RenderDevice};
use kiln_engine::frame::{BuildContext, FrameConfig, FrameOrchestrator};
use kiln_engine::logging::{LoggingConfig, init_logging};
use kiln_engine::pass::{Pass, StateToken};
use kiln_engine::resource::{BufferDesc, ResourceState, UploadTarget, upload_buffer};

use passes::fill::{self, FillParams, FillPass};
use passes::readback::{self, ReadbackPass};

const VALUE_COUNT: u32 = 4096;
const FRAMES: u32 = 8;
const SCALE: u32 = 3;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    pollster::block_on(run())
}

async fn run() -> Result<()> {
    let device = RenderDevice::new_wgpu(DeviceInit::default()).await?;
    let wgpu_device = device
        .wgpu_device()
        .context("wgpu device missing after creation")?;
    let fill_pipeline = device
        .pipelines()
        .register_compute(fill::create_pipeline(wgpu_device));

    let fence = device.create_fence("frame");
    let mut queue = device.create_queue("main");
    let mut pool = CommandBufferPool::new(PoolConfig {
        label: "frame pool".to_string(),
        ..PoolConfig::default()
    });
    let heap = device.create_heap(HeapDesc {
        label: "persistent".to_string(),
        capacity: 16,
        visibility: HeapVisibility::GpuVisible,
    });
    let ctx = BuildContext::new(&device, &heap);

    let size = u64::from(VALUE_COUNT) * 4;
    let (values, values_token) = device.create_buffer(BufferDesc {
        label: "values".to_string(),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
    })?;
    let (params, params_token) = device.create_buffer(BufferDesc {
        label: "fill params".to_string(),
        size: std::mem::size_of::<FillParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })?;
    let (staging, staging_token) = device.create_buffer(BufferDesc {
        label: "readback".to_string(),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    })?;

    let values_token = upload_buffer(
        &device,
        &mut queue,
        &fence,
        &mut pool,
        UploadTarget {
            resource: &values.handle(),
            offset: 0,
            token: values_token,
        },
        &vec![0; size as usize],
    )?;

    // Params are only written through the queue, which orders before the submission.
    drop(params_token);
    let params_token = StateToken::assume(&params.handle(), ResourceState::VertexOrUniform);

    // Frame 0 starts from the upload; later frames start where the readback
    // left things.
    let (first_fill, first_fill_out) = FillPass::new(
        &ctx,
        fill_pipeline,
        &values.handle(),
        &params.handle(),
        fill::InputStates {
            values: values_token,
            params: params_token,
        },
    )?;
    let (first_readback, first_out) = ReadbackPass::new(
        &values.handle(),
        &staging.handle(),
        readback::InputStates {
            values: first_fill_out.values,
            readback: staging_token,
        },
    )?;

    let loop_values = first_out.values.state();
    let loop_readback = first_out.readback.state();
    let (fill_pass, fill_out) = FillPass::new(
        &ctx,
        fill_pipeline,
        &values.handle(),
        &params.handle(),
        fill::InputStates {
            values: first_out.values,
            params: first_fill_out.params,
        },
    )?;
    let (readback_pass, readback_out) = ReadbackPass::new(
        &values.handle(),
        &staging.handle(),
        readback::InputStates {
            values: fill_out.values,
            readback: first_out.readback,
        },
    )?;
    ensure!(
        readback_out.values.state() == loop_values && readback_out.readback.state() == loop_readback,
        "frame chain does not close: ends in {:?}/{:?}, starts from {:?}/{:?}",
        readback_out.values.state(),
        readback_out.readback.state(),
        loop_values,
        loop_readback
    );
    log::debug!(
        "passes built; steady fill emits {} transition(s), readback {}",
        fill_pass.barriers().transitions().len(),
        readback_pass.barriers().transitions().len()
    );

    let mut frames = FrameOrchestrator::new(&device, fence, FrameConfig::default())?;
    for _ in 0..FRAMES {
        let info = frames.begin_frame()?;
        let (fill, readback) = if info.index == 0 {
            (&first_fill, &first_readback)
        } else {
            (&fill_pass, &readback_pass)
        };
        params.write_pod(
            &device,
            0,
            &[FillParams {
                scale: SCALE,
                frame: info.index as u32,
                len: fill.len(),
                _pad: 0,
            }],
        )?;
        frames.record_pass(&mut pool, fill)?;
        frames.record_pass(&mut pool, readback)?;
        let value = frames.end_frame(&mut queue, &mut pool)?;
        log::info!(
            "frame {} in slot {} signals {value} (waited for {:?})",
            info.index,
            info.slot,
            info.waited_for
        );
    }
    frames.wait_idle()?;

    let bytes = staging.read(&device, 0, size)?;
    let last = FRAMES - 1;
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let got = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let want = i as u32 * SCALE + last;
        ensure!(got == want, "values[{i}] = {got}, expected {want}");
    }

    log::info!(
        "{FRAMES} frames, {} command buffers allocated, {VALUE_COUNT} values verified",
        pool.allocated()
    );
    Ok(())
}
