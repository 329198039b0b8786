/*!
 * Shared Memory Segment
 * Owned handle to one kernel segment
 */

use super::manager::ManagerInner;
use super::types::ShmResult;
use crate::core::limits::SHM_ID_ENV_VAR;
use crate::core::types::{RawShmId, Size};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Exclusive owner of one shared memory segment
///
/// Not `Clone`: `release` (or dropping the handle) is the only way to
/// invalidate the underlying segment, so a released id can never be passed
/// back in through this type.
pub struct SegmentHandle {
    id: RawShmId,
    size: Size,
    generation: u64,
    owner: Arc<ManagerInner>,
    released: bool,
}

impl SegmentHandle {
    pub(super) fn new(id: RawShmId, size: Size, generation: u64, owner: Arc<ManagerInner>) -> Self {
        Self {
            id,
            size,
            generation,
            owner,
            released: false,
        }
    }

    /// Kernel segment id
    #[inline]
    pub fn id(&self) -> RawShmId {
        self.id
    }

    /// Size requested at allocation
    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    #[inline]
    pub(super) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(super) fn owner(&self) -> &Arc<ManagerInner> {
        &self.owner
    }

    /// Environment pair handing this segment to an instrumented child process
    pub fn env_var(&self) -> (&'static str, String) {
        (SHM_ID_ENV_VAR, self.id.to_string())
    }

    /// Destroy the segment, surfacing any kernel failure
    pub fn release(mut self) -> ShmResult<()> {
        self.released = true;
        self.owner.destroy(self.id, self.generation)
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.owner.destroy(self.id, self.generation) {
            warn!(segment_id = self.id, error = %e, "Failed to release dropped segment");
        }
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("generation", &self.generation)
            .finish()
    }
}
