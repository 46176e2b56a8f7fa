use crate::command::CommandBuffer;
use crate::error::{CoreError, Result};
use crate::resource::{ResourceHandle, ResourceId, ResourceState};

use super::StateToken;

/// One state-transition directive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Transition {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Builds the transition list of one pass at construction time.
///
/// Each resource the pass touches goes through [`BarrierBuilder::require`]
/// exactly once, so a pass emits at most one transition per resource. A
/// transition is emitted only when the incoming token's state differs from the
/// state the pass needs. The pass leaves the resource in that working state;
/// the next pass's `require` moves it on from there.
#[derive(Debug)]
pub struct BarrierBuilder {
    label: String,
    transitions: Vec<Transition>,
    required: Vec<ResourceId>,
}

impl BarrierBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            transitions: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Declares that the pass uses `resource` in `required` state.
    ///
    /// `token` is the caller's guarantee about the state on entry; it must name
    /// `resource`. The returned token names `required` and is what the pass
    /// hands on in its outputs.
    pub fn require(
        &mut self,
        resource: &ResourceHandle,
        token: StateToken,
        required: ResourceState,
    ) -> Result<StateToken> {
        if token.resource() != resource.id() {
            return Err(CoreError::ContractMismatch {
                expected: resource.id(),
                found: token.resource(),
            });
        }
        if self.required.contains(&resource.id()) {
            return Err(CoreError::DuplicateRequirement {
                resource: resource.id(),
                state: required,
            });
        }
        self.required.push(resource.id());

        if token.state() != required {
            log::trace!(
                "pass `{}`: {} {:?} -> {:?}",
                self.label,
                resource.id(),
                token.state(),
                required
            );
            self.transitions.push(Transition {
                resource: resource.id(),
                before: token.state(),
                after: required,
            });
        }
        Ok(token.into_state(required))
    }

    pub fn finish(self) -> PassBarriers {
        PassBarriers {
            label: self.label,
            transitions: self.transitions,
        }
    }
}

/// Transitions a pass records ahead of its own work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassBarriers {
    label: String,
    transitions: Vec<Transition>,
}

impl PassBarriers {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn transitions_for(&self, resource: ResourceId) -> impl Iterator<Item = &Transition> + '_ {
        self.transitions
            .iter()
            .filter(move |t| t.resource == resource)
    }

    pub fn record(&self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.barriers(&self.transitions)
    }
}

#[cfg(test)]
mod barrier_tests {
    use super::*;
    use crate::device::RenderDevice;
    use crate::resource::TextureDesc;
    use crate::submit::Completion;

    fn texture(device: &RenderDevice, label: &str) -> (ResourceHandle, StateToken) {
        let (texture, token) = device
            .create_texture(TextureDesc {
                label: label.to_string(),
                width: 4,
                height: 4,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
            })
            .unwrap();
        (texture.handle(), token)
    }

    #[test]
    fn matching_state_emits_nothing() {
        let device = RenderDevice::headless(Completion::Immediate);
        let (t, _) = texture(&device, "t");

        let mut builder = BarrierBuilder::new("reader");
        let token = StateToken::assume(&t, ResourceState::ShaderRead);
        let token = builder.require(&t, token, ResourceState::ShaderRead).unwrap();
        let barriers = builder.finish();

        assert_eq!(token.state(), ResourceState::ShaderRead);
        assert_eq!(barriers.transitions_for(t.id()).count(), 0);
        assert!(barriers.is_empty());
    }

    #[test]
    fn differing_state_emits_one_transition() {
        let device = RenderDevice::headless(Completion::Immediate);
        let (t, token) = texture(&device, "t");

        let mut builder = BarrierBuilder::new("writer");
        let token = builder.require(&t, token, ResourceState::RenderTarget).unwrap();
        let barriers = builder.finish();

        assert_eq!(
            barriers.transitions(),
            &[Transition {
                resource: t.id(),
                before: ResourceState::Uncommitted,
                after: ResourceState::RenderTarget,
            }]
        );
        assert_eq!(token.state(), ResourceState::RenderTarget);
    }

    #[test]
    fn identical_construction_gives_identical_lists() {
        let device = RenderDevice::headless(Completion::Immediate);
        let (a, _) = texture(&device, "a");
        let (b, _) = texture(&device, "b");

        let build = || {
            let mut builder = BarrierBuilder::new("blur");
            let ta = builder
                .require(&a, StateToken::assume(&a, ResourceState::RenderTarget), ResourceState::ShaderRead)
                .unwrap();
            let tb = builder
                .require(&b, StateToken::assume(&b, ResourceState::ShaderRead), ResourceState::UnorderedAccess)
                .unwrap();
            drop((ta, tb));
            builder.finish()
        };

        assert_eq!(build(), build());
        assert_eq!(build().transitions().len(), 2);
    }

    #[test]
    fn token_for_other_resource_is_rejected() {
        let device = RenderDevice::headless(Completion::Immediate);
        let (a, _) = texture(&device, "a");
        let (b, b_token) = texture(&device, "b");

        let mut builder = BarrierBuilder::new("mismatch");
        let err = builder
            .require(&a, b_token, ResourceState::ShaderRead)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::ContractMismatch {
                expected: a.id(),
                found: b.id(),
            }
        );
    }

    #[test]
    fn second_requirement_is_rejected() {
        let device = RenderDevice::headless(Completion::Immediate);
        let (t, token) = texture(&device, "t");

        let mut builder = BarrierBuilder::new("twice");
        let _held = builder.require(&t, token, ResourceState::ShaderRead).unwrap();
        let forged = StateToken::assume(&t, ResourceState::ShaderRead);
        assert!(matches!(
            builder.require(&t, forged, ResourceState::UnorderedAccess),
            Err(CoreError::DuplicateRequirement { .. })
        ));
        assert_eq!(builder.finish().transitions().len(), 1);
    }
}
