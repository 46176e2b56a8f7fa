//! Frame loop.
//!
//! Construction and recording get separate, explicit contexts: passes are
//! built against an immutable [`BuildContext`] and record against a small
//! per-frame [`FrameContext`]. The [`FrameOrchestrator`] owns frame-in-flight
//! bookkeeping.

mod context;
mod orchestrator;

pub use context::{BuildContext, FrameContext, FrameInfo};
pub use orchestrator::{FrameConfig, FrameOrchestrator};
