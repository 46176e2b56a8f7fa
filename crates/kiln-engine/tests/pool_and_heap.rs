use std::collections::HashSet;

use kiln_engine::CoreError;
use kiln_engine::binding::{BindingView, HeapDesc, HeapVisibility, ViewKind};
use kiln_engine::command::{CommandBuffer, CommandBufferPool};
use kiln_engine::device::RenderDevice;
use kiln_engine::pass::StateToken;
use kiln_engine::resource::{BufferDesc, ResourceState, UploadTarget, upload_buffer};
use kiln_engine::submit::Completion;

fn closed(pool: &mut CommandBufferPool, label: &str) -> CommandBuffer {
    let mut cmd = pool.acquire(label).unwrap();
    cmd.begin().unwrap();
    cmd.end().unwrap();
    cmd
}

#[test]
fn oldest_retired_buffer_is_reused_first() {
    let device = RenderDevice::headless(Completion::Manual);
    let control = device.headless_control().unwrap().clone();
    let mut queue = device.create_queue("main");
    let fence = device.create_fence("main");
    let mut pool = CommandBufferPool::default();

    let buffers: Vec<_> = (1..=3)
        .map(|v| {
            let cmd = closed(&mut pool, &format!("b{v}"));
            queue.submit(&[cmd.clone()], &fence, v).unwrap();
            cmd
        })
        .collect();
    assert_eq!(pool.allocated(), 3);

    control.retire_next();
    let reused = pool.acquire("again").unwrap();
    assert!(reused.same_as(&buffers[0]));
    assert_eq!(reused.label(), "again");

    // b2 has not retired, so the next acquire allocates rather than skipping ahead.
    let fresh = pool.acquire("fresh").unwrap();
    assert!(buffers.iter().all(|b| !b.same_as(&fresh)));
    assert_eq!(pool.allocated(), 4);
}

#[test]
fn heap_hands_out_exactly_capacity_slots() {
    let device = RenderDevice::headless(Completion::Immediate);
    for visibility in [HeapVisibility::CpuOnly, HeapVisibility::GpuVisible] {
        let heap = device.create_heap(HeapDesc {
            label: "slots".into(),
            capacity: 8,
            visibility,
        });

        let mut addresses = HashSet::new();
        for _ in 0..8 {
            let handle = heap.allocate().unwrap();
            assert!(handle.is_valid());
            assert_eq!(
                handle.gpu_address().is_some(),
                visibility == HeapVisibility::GpuVisible
            );
            assert!(addresses.insert(handle.cpu_address()));
        }
        assert!(matches!(
            heap.allocate(),
            Err(CoreError::Capacity {
                capacity: 8,
                requested: 9,
                ..
            })
        ));
    }
}

#[test]
fn staged_views_are_copied_into_visible_heap() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (buffer, _token) = device
        .create_buffer(BufferDesc {
            label: "ssbo".into(),
            size: 256,
            usage: wgpu::BufferUsages::STORAGE,
        })
        .unwrap();
    let staging = device.create_heap(HeapDesc {
        label: "staging".into(),
        capacity: 4,
        visibility: HeapVisibility::CpuOnly,
    });
    let mut visible = device.create_heap(HeapDesc {
        label: "visible".into(),
        capacity: 4,
        visibility: HeapVisibility::GpuVisible,
    });

    let src = staging.allocate_range(2).unwrap();
    staging
        .write(src, BindingView::new(buffer.handle(), ViewKind::StorageRead))
        .unwrap();
    staging
        .write(
            src.offset(1),
            BindingView::new(buffer.handle(), ViewKind::StorageReadWrite),
        )
        .unwrap();

    let dst = visible.allocate_range(2).unwrap();
    visible.copy_from(dst, &staging, src, 2).unwrap();
    let views = visible.views(dst, 2).unwrap();
    assert_eq!(views[1].kind, ViewKind::StorageReadWrite);

    visible.reset();
    assert_eq!(visible.allocated(), 0);
    assert_eq!(visible.allocate().unwrap(), visible.first_slot());
}

#[test]
fn upload_lands_and_leaves_copy_dest() {
    let device = RenderDevice::headless(Completion::Immediate);
    let mut queue = device.create_queue("upload");
    let fence = device.create_fence("upload");
    let mut pool = CommandBufferPool::default();
    let (buffer, token) = device
        .create_buffer(BufferDesc {
            label: "vertices".into(),
            size: 32,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        })
        .unwrap();

    let token: StateToken = upload_buffer(
        &device,
        &mut queue,
        &fence,
        &mut pool,
        UploadTarget {
            resource: &buffer.handle(),
            offset: 8,
            token,
        },
        &[1, 2, 3, 4],
    )
    .unwrap();

    assert_eq!(token.state(), ResourceState::CopyDest);
    assert_eq!(buffer.read(&device, 8, 4).unwrap(), vec![1, 2, 3, 4]);
    assert!(fence.has_reached(1));

    let stats = device.headless_control().unwrap().stats();
    assert_eq!(stats.copies, 1);
    assert_eq!(stats.barriers, 2);
}

#[test]
fn unaligned_upload_is_refused_before_touching_the_device() {
    let device = RenderDevice::headless(Completion::Immediate);
    let mut queue = device.create_queue("upload");
    let fence = device.create_fence("upload");
    let mut pool = CommandBufferPool::default();
    let (buffer, _token) = device
        .create_buffer(BufferDesc {
            label: "bytes".into(),
            size: 16,
            usage: wgpu::BufferUsages::COPY_DST,
        })
        .unwrap();

    for (offset, data) in [(0, &[1u8, 2, 3][..]), (2, &[1, 2, 3, 4][..])] {
        let err = upload_buffer(
            &device,
            &mut queue,
            &fence,
            &mut pool,
            UploadTarget {
                resource: &buffer.handle(),
                offset,
                token: StateToken::assume(&buffer.handle(), ResourceState::Common),
            },
            data,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)), "{err}");
    }

    assert_eq!(fence.target(), 0);
    assert_eq!(buffer.read(&device, 0, 16).unwrap(), vec![0; 16]);
    assert_eq!(device.headless_control().unwrap().stats().copies, 0);
}
