//! Per-pass state contract.
//!
//! Each pass type declares two plain structs:
//! - `InputStates`: one [`StateToken`] per external resource it touches,
//!   naming the state the producer left it in
//! - `OutputStates`: the tokens it hands on, naming the state it works on each
//!   resource (external or owned) in, which is the state it leaves it in
//!
//! At construction the pass runs every resource through a [`BarrierBuilder`],
//! which diffs the incoming state against the state the pass needs and keeps
//! only the transitions that are actually required, at most one per resource.
//! Because tokens are move-only, a downstream pass can only assume what its
//! producer declared.

mod barrier;
mod token;

pub use barrier::{BarrierBuilder, PassBarriers, Transition};
pub use token::StateToken;

use crate::command::CommandBuffer;
use crate::error::Result;
use crate::frame::FrameContext;

/// A constructed pass, ready to record once per frame.
pub trait Pass {
    /// Diagnostic name; also used to label the pass's command buffer.
    fn label(&self) -> &str;

    /// Transitions computed at construction.
    fn barriers(&self) -> &PassBarriers;

    /// Records the pass body. The pass's transitions are recorded by the caller.
    fn record(&self, cmd: &mut CommandBuffer, frame: &FrameContext<'_>) -> Result<()>;
}
