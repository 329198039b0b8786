/*!
 * Shared Memory Manager
 * Central manager for segment allocation, reads, and release
 */

use super::segment::SegmentHandle;
use super::sysv::SysvTable;
use super::traits::SegmentTable;
use super::types::{SegmentStats, ShmError, ShmResult};
use crate::core::config::ShmConfig;
use crate::core::limits::OWNER_ONLY_MODE;
use crate::core::types::{RawShmId, Size};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
struct LiveSegment {
    generation: u64,
    size: Size,
}

#[derive(Debug, Default)]
struct Accounting {
    segments: usize,
    bytes: Size,
}

/// State shared between a manager and the handles it issued
pub(super) struct ManagerInner {
    table: Arc<dyn SegmentTable>,
    config: ShmConfig,
    // Generation tags distinguish a live segment from an earlier one the
    // kernel removed externally and then reissued the same id for.
    live: DashMap<RawShmId, LiveSegment, RandomState>,
    accounting: Mutex<Accounting>,
    next_generation: AtomicU64,
}

impl ManagerInner {
    fn reserve(&self, size: Size) -> ShmResult<()> {
        let mut acct = self.accounting.lock();

        if acct.segments >= self.config.max_live_segments {
            return Err(ShmError::SegmentLimitExceeded(
                acct.segments,
                self.config.max_live_segments,
            ));
        }

        if acct.bytes.saturating_add(size) > self.config.max_total_bytes {
            return Err(ShmError::MemoryLimitExceeded {
                current: acct.bytes,
                requested: size,
                max: self.config.max_total_bytes,
            });
        }

        acct.segments += 1;
        acct.bytes += size;
        Ok(())
    }

    fn unreserve(&self, size: Size) {
        let mut acct = self.accounting.lock();
        acct.segments = acct.segments.saturating_sub(1);
        acct.bytes = acct.bytes.saturating_sub(size);
    }

    fn ensure_live(&self, handle: &SegmentHandle) -> ShmResult<()> {
        match self.live.get(&handle.id()) {
            Some(seg) if seg.generation == handle.generation() => Ok(()),
            _ => Err(ShmError::InvalidHandle(handle.id())),
        }
    }

    /// Forget the segment and mark it for destruction in the kernel
    ///
    /// Bookkeeping is dropped even if the kernel call fails: the handle is
    /// gone either way and must not be revalidated.
    pub(super) fn destroy(&self, id: RawShmId, generation: u64) -> ShmResult<()> {
        let Some((_, segment)) = self
            .live
            .remove_if(&id, |_, seg| seg.generation == generation)
        else {
            debug!(segment_id = id, generation, "Release of stale segment handle");
            return Err(ShmError::InvalidHandle(id));
        };

        self.unreserve(segment.size);

        match self.table.remove(id) {
            Ok(()) => {
                info!(
                    segment_id = id,
                    size = segment.size,
                    "Released shared memory segment"
                );
                Ok(())
            }
            Err(e) => {
                warn!(segment_id = id, error = %e, "Kernel refused segment removal");
                Err(e)
            }
        }
    }
}

/// Shared memory manager
///
/// Cloning is cheap and yields a view of the same live set.
#[derive(Clone)]
pub struct SegmentManager {
    inner: Arc<ManagerInner>,
}

impl SegmentManager {
    /// Manager over the host's System V segment table
    pub fn new(config: ShmConfig) -> Self {
        Self::with_table(Arc::new(SysvTable::new()), config)
    }

    /// Manager configured from `SHM_BRIDGE_*` environment variables
    pub fn from_env() -> Self {
        Self::new(ShmConfig::from_env())
    }

    pub fn with_table(table: Arc<dyn SegmentTable>, config: ShmConfig) -> Self {
        info!(
            max_segment_size = config.max_segment_size,
            max_live_segments = config.max_live_segments,
            max_total_bytes = config.max_total_bytes,
            "Shared memory manager initialized"
        );
        Self {
            inner: Arc::new(ManagerInner {
                table,
                config,
                live: DashMap::with_hasher(RandomState::new()),
                accounting: Mutex::new(Accounting::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> ShmConfig {
        self.inner.config
    }

    /// Create a new owner-only segment of `size` bytes
    #[instrument(level = "debug", skip(self))]
    pub fn allocate(&self, size: Size) -> ShmResult<SegmentHandle> {
        if size == 0 {
            return Err(ShmError::InvalidSize("Size cannot be zero".to_string()));
        }

        let max = self.inner.config.max_segment_size;
        if size > max {
            return Err(ShmError::SizeExceeded {
                requested: size,
                max,
            });
        }

        self.inner.reserve(size)?;

        let id = match self.inner.table.create(size, OWNER_ONLY_MODE) {
            Ok(id) => id,
            Err(e) => {
                self.inner.unreserve(size);
                warn!(size, error = %e, "Failed to allocate shared memory segment");
                return Err(e);
            }
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some(stale) = self.inner.live.insert(id, LiveSegment { generation, size }) {
            warn!(
                segment_id = id,
                stale_generation = stale.generation,
                "Kernel reissued a segment id that was removed outside this manager"
            );
            self.inner.unreserve(stale.size);
        }

        info!(
            segment_id = id,
            size,
            live_segments = self.live_segments(),
            "Allocated shared memory segment"
        );

        Ok(SegmentHandle::new(id, size, generation, Arc::clone(&self.inner)))
    }

    /// Copy the first `size` bytes of the segment into a new buffer
    pub fn read(&self, handle: &SegmentHandle, size: Size) -> ShmResult<Vec<u8>> {
        self.check_read(handle, size)?;
        let mut buf = vec![0u8; size];
        self.copy_out(handle, &mut buf)?;
        Ok(buf)
    }

    /// Copy the first `buf.len()` bytes of the segment into `buf`
    ///
    /// On failure `buf` is left untouched.
    pub fn read_into(&self, handle: &SegmentHandle, buf: &mut [u8]) -> ShmResult<()> {
        self.check_read(handle, buf.len())?;
        self.copy_out(handle, buf)
    }

    /// Destroy the segment
    ///
    /// A handle always releases through the manager that issued it.
    pub fn release(&self, handle: SegmentHandle) -> ShmResult<()> {
        handle.release()
    }

    /// Kernel metadata for the segment
    pub fn stats(&self, handle: &SegmentHandle) -> ShmResult<SegmentStats> {
        self.check_owned(handle)?;
        self.inner.table.stat(handle.id())
    }

    /// Number of segments currently owned
    pub fn live_segments(&self) -> usize {
        self.inner.accounting.lock().segments
    }

    /// Total bytes across owned segments
    pub fn live_bytes(&self) -> Size {
        self.inner.accounting.lock().bytes
    }

    /// Ids of owned segments, in no particular order
    pub fn live_ids(&self) -> Vec<RawShmId> {
        self.inner.live.iter().map(|entry| *entry.key()).collect()
    }

    pub fn owns(&self, id: RawShmId) -> bool {
        self.inner.live.contains_key(&id)
    }

    fn check_owned(&self, handle: &SegmentHandle) -> ShmResult<()> {
        if !Arc::ptr_eq(&self.inner, handle.owner()) {
            return Err(ShmError::InvalidHandle(handle.id()));
        }
        self.inner.ensure_live(handle)
    }

    fn check_read(&self, handle: &SegmentHandle, size: Size) -> ShmResult<()> {
        self.check_owned(handle)?;

        if size == 0 {
            return Err(ShmError::InvalidSize("Read size cannot be zero".to_string()));
        }

        if size > handle.size() {
            return Err(ShmError::ReadOutOfBounds {
                id: handle.id(),
                requested: size,
                allocated: handle.size(),
            });
        }

        Ok(())
    }

    fn copy_out(&self, handle: &SegmentHandle, buf: &mut [u8]) -> ShmResult<()> {
        match self.inner.table.read_into(handle.id(), buf) {
            Ok(()) => {
                debug!(segment_id = handle.id(), size = buf.len(), "Read shared memory segment");
                Ok(())
            }
            Err(e) => {
                warn!(segment_id = handle.id(), error = %e, "Failed to read shared memory segment");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentManager")
            .field("config", &self.inner.config)
            .field("live_segments", &self.live_segments())
            .finish()
    }
}
