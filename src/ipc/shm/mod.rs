/*!
 * Shared Memory Module
 * System V segment lifecycle: allocate, read, release
 */

pub mod manager;
pub mod segment;
#[cfg(target_os = "linux")]
pub mod sweep;
pub mod sysv;
pub mod traits;
pub mod types;

// Re-export public API
pub use manager::SegmentManager;
pub use segment::SegmentHandle;
pub use sysv::SysvTable;
pub use traits::SegmentTable;
pub use types::{ErrorKind, SegmentStats, ShmError, ShmResult};
