//! Logging utilities.
//!
//! The engine itself only emits through the `log` facade; this module wires
//! up `env_logger` for binaries and tests that want output.

mod init;

pub use init::{default_filter, init_logging, LoggingConfig};
