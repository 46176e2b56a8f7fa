//! Kiln engine crate.
//!
//! GPU command submission and synchronization core: fences, a FIFO
//! submission queue, pooled command buffers, bump-allocated binding tables,
//! and a per-pass resource state contract carried by move-only tokens.
//!
//! A frame typically looks like:
//! - build passes once against a [`frame::BuildContext`]
//! - per frame, [`frame::FrameOrchestrator::begin_frame`], record each pass,
//!   then [`frame::FrameOrchestrator::end_frame`]

pub mod binding;
pub mod command;
pub mod device;
pub mod frame;
pub mod pass;
pub mod resource;
pub mod submit;
pub mod sync;

pub mod logging;
mod error;

pub use error::{CoreError, Result};
