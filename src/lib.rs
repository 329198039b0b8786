/*!
 * System V Shared Memory Bridge
 * Segment lifecycle (allocate, read, release) exposed to foreign runtimes
 */

pub mod core;
pub mod ffi;
pub mod ipc;
pub mod monitoring;

// Re-exports
pub use crate::core::config::ShmConfig;
pub use crate::core::types::{RawShmId, Size};
pub use crate::ffi::SegmentBridge;
pub use crate::ipc::shm::{
    ErrorKind, SegmentHandle, SegmentManager, SegmentStats, SegmentTable, ShmError, ShmResult,
    SysvTable,
};
#[cfg(target_os = "linux")]
pub use crate::ipc::shm::sweep::{sweep, SweepReport, SysvSegmentInfo};
pub use crate::monitoring::init_tracing;
