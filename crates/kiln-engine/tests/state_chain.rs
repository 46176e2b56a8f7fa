use kiln_engine::CoreError;
use kiln_engine::device::RenderDevice;
use kiln_engine::pass::{BarrierBuilder, PassBarriers, StateToken, Transition};
use kiln_engine::resource::{BufferDesc, ResourceHandle, ResourceState, TextureDesc};
use kiln_engine::submit::Completion;

struct ProducerOutputs {
    t: StateToken,
}

struct ConsumerInputs {
    t: StateToken,
}

struct ConsumerOutputs {
    t: StateToken,
}

/// Samples `t` in a fragment shader.
fn producer(t: &ResourceHandle, token: StateToken) -> (PassBarriers, ProducerOutputs) {
    let mut b = BarrierBuilder::new("producer");
    let token = b.require(t, token, ResourceState::ShaderRead).unwrap();
    (b.finish(), ProducerOutputs { t: token })
}

/// Writes `t` as storage.
fn consumer(t: &ResourceHandle, inputs: ConsumerInputs) -> (PassBarriers, ConsumerOutputs) {
    let mut b = BarrierBuilder::new("consumer");
    let token = b.require(t, inputs.t, ResourceState::UnorderedAccess).unwrap();
    (b.finish(), ConsumerOutputs { t: token })
}

fn texture(device: &RenderDevice, label: &str) -> (ResourceHandle, StateToken) {
    let (texture, token) = device
        .create_texture(TextureDesc {
            label: label.into(),
            width: 16,
            height: 16,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::STORAGE_BINDING,
        })
        .unwrap();
    (texture.handle(), token)
}

#[test]
fn consumer_emits_exactly_one_transition() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (t, token) = texture(&device, "t");

    let (a, a_out) = producer(&t, token);
    assert_eq!(a_out.t.state(), ResourceState::ShaderRead);
    assert_eq!(
        a.transitions(),
        &[Transition {
            resource: t.id(),
            before: ResourceState::Uncommitted,
            after: ResourceState::ShaderRead,
        }]
    );

    let (b, b_out) = consumer(&t, ConsumerInputs { t: a_out.t });
    assert_eq!(b.transitions_for(t.id()).count(), 1);
    assert_eq!(
        b.transitions(),
        &[Transition {
            resource: t.id(),
            before: ResourceState::ShaderRead,
            after: ResourceState::UnorderedAccess,
        }]
    );
    assert_eq!(b_out.t.state(), ResourceState::UnorderedAccess);
    assert_eq!(b_out.t.resource(), t.id());
}

#[test]
fn chained_passes_emit_one_transition_each() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (t, token) = texture(&device, "t");

    let (a, a_out) = producer(&t, token);
    let (b, b_out) = consumer(&t, ConsumerInputs { t: a_out.t });
    let (c, c_out) = producer(&t, b_out.t);

    for barriers in [&a, &b, &c] {
        assert_eq!(barriers.transitions_for(t.id()).count(), 1, "{}", barriers.label());
    }
    assert_eq!(c.transitions()[0].before, ResourceState::UnorderedAccess);
    assert_eq!(c_out.t.state(), ResourceState::ShaderRead);
}

#[test]
fn matching_input_state_emits_nothing() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (t, _token) = texture(&device, "t");

    let token = StateToken::assume(&t, ResourceState::UnorderedAccess);
    let mut b = BarrierBuilder::new("consumer");
    let token = b.require(&t, token, ResourceState::UnorderedAccess).unwrap();
    assert_eq!(token.state(), ResourceState::UnorderedAccess);
    assert!(b.finish().is_empty());
}

#[test]
fn identical_construction_gives_identical_barriers() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (t, _token) = texture(&device, "t");

    let first = consumer(
        &t,
        ConsumerInputs {
            t: StateToken::assume(&t, ResourceState::ShaderRead),
        },
    )
    .0;
    let second = consumer(
        &t,
        ConsumerInputs {
            t: StateToken::assume(&t, ResourceState::ShaderRead),
        },
    )
    .0;
    assert_eq!(first, second);
}

#[test]
fn token_for_another_resource_is_refused() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (t, _t_token) = texture(&device, "t");
    let (_u, u_token) = texture(&device, "u");

    let mut b = BarrierBuilder::new("consumer");
    let err = b
        .require(&t, u_token, ResourceState::UnorderedAccess)
        .unwrap_err();
    assert!(matches!(err, CoreError::ContractMismatch { expected, .. } if expected == t.id()));
}

#[test]
fn a_resource_is_required_once_per_pass() {
    let device = RenderDevice::headless(Completion::Immediate);
    let (buffer, token) = device
        .create_buffer(BufferDesc {
            label: "b".into(),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
        })
        .unwrap();
    let b_handle = buffer.handle();

    let mut b = BarrierBuilder::new("twice");
    let _held = b
        .require(&b_handle, token, ResourceState::ShaderRead)
        .unwrap();
    let again = StateToken::assume(&b_handle, ResourceState::ShaderRead);
    assert!(matches!(
        b.require(&b_handle, again, ResourceState::UnorderedAccess),
        Err(CoreError::DuplicateRequirement { .. })
    ));
}
