//! Shared command-line pieces for the reflection removal binaries.

pub mod common;

pub use common::{init_tracing, BackendKind, ConfigArgs, DeviceArgs, DeviceOpts};
