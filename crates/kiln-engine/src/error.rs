use std::fmt;

use crate::resource::{ResourceId, ResourceState};

/// Error raised by the submission/synchronization core.
///
/// Every variant describes a condition the renderer cannot continue through:
/// callers are expected to abort the frame (and usually the process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A fixed-size table (binding heap, command buffer pool) ran out of room.
    Capacity {
        what: String,
        capacity: u32,
        requested: u32,
    },
    /// An object was used outside the state its protocol allows.
    Protocol(String),
    /// A state token was handed to a pass for a different resource.
    ContractMismatch {
        expected: ResourceId,
        found: ResourceId,
    },
    /// A resource was required twice in the same pass.
    DuplicateRequirement {
        resource: ResourceId,
        state: ResourceState,
    },
    /// A fence was asked to move backwards.
    NonMonotonicSignal { current: u64, requested: u64 },
    /// A fence wait targeted a value no submission will ever signal.
    NeverScheduled { value: u64, scheduled: u64 },
    /// A time-boxed fence wait expired.
    Timeout { value: u64, completed: u64 },
    /// The device backend reported a failure.
    Backend(String),
}

impl CoreError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity {
                what,
                capacity,
                requested,
            } => write!(
                f,
                "{what} exhausted: requested {requested} with capacity {capacity}"
            ),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::ContractMismatch { expected, found } => write!(
                f,
                "state token for {found} handed to a pass binding {expected}"
            ),
            Self::DuplicateRequirement { resource, state } => write!(
                f,
                "{resource} already required by this pass (second request for {state:?})"
            ),
            Self::NonMonotonicSignal { current, requested } => write!(
                f,
                "fence signal {requested} is below completed value {current}"
            ),
            Self::NeverScheduled { value, scheduled } => write!(
                f,
                "wait for fence value {value} but only {scheduled} has been scheduled"
            ),
            Self::Timeout { value, completed } => write!(
                f,
                "timed out waiting for fence value {value} (completed {completed})"
            ),
            Self::Backend(msg) => write!(f, "backend failure: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;
