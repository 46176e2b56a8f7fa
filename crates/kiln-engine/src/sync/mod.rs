//! CPU/device synchronization.
//!
//! A [`Fence`] is the only blocking primitive in the core: the device signals
//! increasing values as submitted batches retire, and the CPU waits on them
//! before reusing anything those batches still read.

mod fence;

pub use fence::{Fence, FenceDriver, FenceSignal, WaitStatus};
