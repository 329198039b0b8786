/*!
 * Shared Memory Traits
 * The kernel segment registry, as seen by the manager
 */

use super::types::{SegmentStats, ShmResult};
use crate::core::types::{RawShmId, Size};

/// Kernel-owned table of shared memory segments
///
/// The table is process-external state; the manager reaches it only through
/// these calls and never caches validity beyond its own live set.
#[cfg_attr(test, mockall::automock)]
pub trait SegmentTable: Send + Sync {
    /// Create a new private segment of `size` bytes with permission bits `mode`
    ///
    /// Must fail rather than attach to an existing segment.
    fn create(&self, size: Size, mode: u32) -> ShmResult<RawShmId>;

    /// Attach read-only, copy `buf.len()` bytes from the segment base, detach
    ///
    /// The attachment never outlives the call. On failure `buf` is untouched.
    fn read_into(&self, id: RawShmId, buf: &mut [u8]) -> ShmResult<()>;

    /// Mark the segment for destruction
    fn remove(&self, id: RawShmId) -> ShmResult<()>;

    /// Snapshot kernel metadata for the segment
    fn stat(&self, id: RawShmId) -> ShmResult<SegmentStats>;
}
