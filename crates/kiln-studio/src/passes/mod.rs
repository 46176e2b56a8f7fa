//! Demo passes. Each declares its own `InputStates` / `OutputStates`.

pub mod fill;
pub mod readback;
