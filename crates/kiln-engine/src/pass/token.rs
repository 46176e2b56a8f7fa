use crate::resource::{ResourceHandle, ResourceId, ResourceState};

/// Capability naming the state one resource is in at a pass boundary.
///
/// Tokens are move-only: a pass consumes the token its producer handed out and
/// returns a new one describing the state it leaves the resource in. Holding
/// the only token for a resource is what makes a pass's assumption about that
/// resource's state trustworthy.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a state token loses the resource's state"]
pub struct StateToken {
    resource: ResourceId,
    state: ResourceState,
}

impl StateToken {
    pub(crate) fn initial(resource: ResourceId) -> Self {
        Self {
            resource,
            state: ResourceState::Uncommitted,
        }
    }

    /// Asserts `resource` is in `state` without a producing pass.
    ///
    /// For chain heads created outside the core (swapchain images, resources
    /// carried over from the previous frame). Creating a second token for a
    /// resource that already has one breaks the state contract.
    pub fn assume(resource: &ResourceHandle, state: ResourceState) -> Self {
        Self {
            resource: resource.id(),
            state,
        }
    }

    #[inline]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn into_state(self, state: ResourceState) -> Self {
        Self { state, ..self }
    }
}
