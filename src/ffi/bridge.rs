/*!
 * Segment Bridge
 * Raw-integer boundary between foreign callers and owned segment handles
 */

use crate::core::types::{RawShmId, Size};
use crate::ipc::shm::{SegmentHandle, SegmentManager, ShmError, ShmResult};
use ahash::RandomState;
use dashmap::DashMap;
use tracing::{debug, info, warn};

/// Holds owned handles on behalf of a caller that only speaks integers
///
/// Raw ids are converted here and nowhere else. A released id leaves the
/// registry, so a second release or a later read fails with
/// `InvalidHandle` instead of reaching the kernel.
pub struct SegmentBridge {
    manager: SegmentManager,
    handles: DashMap<RawShmId, SegmentHandle, RandomState>,
}

impl SegmentBridge {
    pub fn new(manager: SegmentManager) -> Self {
        Self {
            manager,
            handles: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn manager(&self) -> &SegmentManager {
        &self.manager
    }

    /// Allocate a segment and return its id (never negative)
    pub fn allocate(&self, size: i32) -> ShmResult<RawShmId> {
        let size = positive_size(size)?;
        let handle = self.manager.allocate(size)?;
        let id = handle.id();

        // An occupant here was removed outside the bridge and its id reissued;
        // dropping it is a no-op against the new segment.
        if let Some(stale) = self.handles.insert(id, handle) {
            warn!(segment_id = id, stale = ?stale, "Replaced stale handle for reissued id");
        }

        debug!(segment_id = id, size, "Bridge allocated segment");
        Ok(id)
    }

    /// Copy `size` bytes of segment `id` into a new buffer
    pub fn read(&self, id: RawShmId, size: i32) -> ShmResult<Vec<u8>> {
        let handle = self.handles.get(&id).ok_or(ShmError::InvalidHandle(id))?;
        self.manager.read(handle.value(), positive_size(size)?)
    }

    /// Copy `size` bytes of segment `id` into the front of `out`
    ///
    /// Returns the number of bytes written. `out` is untouched on failure.
    /// An unknown id is reported as `InvalidHandle` before `size` or `out`
    /// are looked at.
    pub fn read_into(&self, id: RawShmId, size: i32, out: &mut [u8]) -> ShmResult<Size> {
        // The shard guard is held across the copy, so a concurrent release of
        // the same id waits for this read to finish.
        let handle = self.handles.get(&id).ok_or(ShmError::InvalidHandle(id))?;

        let size = positive_size(size)?;
        if out.len() < size {
            return Err(ShmError::BufferTooSmall {
                required: size,
                available: out.len(),
            });
        }

        self.manager.read_into(handle.value(), &mut out[..size])?;
        Ok(size)
    }

    /// Destroy segment `id`
    pub fn release(&self, id: RawShmId) -> ShmResult<()> {
        let (_, handle) = self
            .handles
            .remove(&id)
            .ok_or(ShmError::InvalidHandle(id))?;
        self.manager.release(handle)
    }

    /// Destroy every segment still held, returning how many were released
    pub fn release_all(&self) -> usize {
        let ids: Vec<RawShmId> = self.handles.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;

        for id in ids {
            match self.release(id) {
                Ok(()) => released += 1,
                Err(e) => warn!(segment_id = id, error = %e, "Failed to release segment during cleanup"),
            }
        }

        if released > 0 {
            info!(released, "Released all bridge segments");
        }
        released
    }

    /// Number of ids currently held
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, id: RawShmId) -> bool {
        self.handles.contains_key(&id)
    }
}

impl Drop for SegmentBridge {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Convert a foreign byte count into a positive size
pub fn positive_size(raw: i32) -> ShmResult<Size> {
    if raw <= 0 {
        return Err(ShmError::InvalidSize(format!("{} bytes", raw)));
    }
    Size::try_from(raw).map_err(|_| ShmError::InvalidSize(format!("{} bytes", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ShmConfig;
    use crate::ipc::shm::traits::MockSegmentTable;
    use crate::ipc::shm::ErrorKind;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn bridge(table: MockSegmentTable) -> SegmentBridge {
        SegmentBridge::new(SegmentManager::with_table(
            Arc::new(table),
            ShmConfig::default(),
        ))
    }

    #[test]
    fn test_positive_size() {
        assert_eq!(positive_size(1).unwrap(), 1);
        assert_eq!(positive_size(i32::MAX).unwrap(), i32::MAX as Size);
        assert_eq!(positive_size(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(positive_size(-1).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_invalid_sizes_never_reach_kernel() {
        let bridge = bridge(MockSegmentTable::new());
        assert_eq!(bridge.allocate(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(bridge.allocate(-1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(bridge.is_empty());
    }

    #[test]
    fn test_second_release_is_rejected() {
        let mut table = MockSegmentTable::new();
        table.expect_create().times(1).returning(|_, _| Ok(3));
        table.expect_remove().with(eq(3)).times(1).returning(|_| Ok(()));

        let bridge = bridge(table);
        let id = bridge.allocate(64).unwrap();

        bridge.release(id).unwrap();
        assert_eq!(bridge.release(id).unwrap_err(), ShmError::InvalidHandle(3));
        assert_eq!(bridge.read(id, 64).unwrap_err(), ShmError::InvalidHandle(3));
    }

    #[test]
    fn test_unknown_id_is_invalid_handle() {
        let bridge = bridge(MockSegmentTable::new());
        assert_eq!(bridge.read(99, 8).unwrap_err(), ShmError::InvalidHandle(99));
        assert_eq!(bridge.release(-3).unwrap_err(), ShmError::InvalidHandle(-3));
    }

    #[test]
    fn test_read_into_checks_buffer() {
        let mut table = MockSegmentTable::new();
        table.expect_create().returning(|_, _| Ok(5));
        table.expect_read_into().returning(|_, buf: &mut [u8]| {
            buf.fill(7);
            Ok(())
        });
        table.expect_remove().returning(|_| Ok(()));

        let bridge = bridge(table);
        let id = bridge.allocate(16).unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            bridge.read_into(id, 8, &mut small).unwrap_err(),
            ShmError::BufferTooSmall {
                required: 8,
                available: 4
            }
        );
        assert_eq!(small, [0u8; 4]);

        let mut out = [0u8; 12];
        assert_eq!(bridge.read_into(id, 8, &mut out).unwrap(), 8);
        assert_eq!(&out[..8], &[7u8; 8]);
        assert_eq!(&out[8..], &[0u8; 4]);
    }

    #[test]
    fn test_released_id_is_invalid_handle_for_any_arguments() {
        let mut table = MockSegmentTable::new();
        table.expect_create().times(1).returning(|_, _| Ok(8));
        table.expect_remove().times(1).returning(|_| Ok(()));
        table.expect_read_into().never();

        let bridge = bridge(table);
        let id = bridge.allocate(64).unwrap();
        bridge.release(id).unwrap();

        let mut out = [0x5Au8; 64];
        for size in [i32::MIN, -1, 0, 1, 64, 65, i32::MAX] {
            assert_eq!(
                bridge.read_into(id, size, &mut out).unwrap_err(),
                ShmError::InvalidHandle(8)
            );
            assert_eq!(bridge.read(id, size).unwrap_err(), ShmError::InvalidHandle(8));
        }
        assert_eq!(
            bridge.read_into(id, 8, &mut []).unwrap_err(),
            ShmError::InvalidHandle(8)
        );
        assert_eq!(out, [0x5Au8; 64]);
    }

    #[test]
    fn test_release_all_on_drop() {
        let mut table = MockSegmentTable::new();
        let mut next = 10;
        table.expect_create().times(3).returning(move |_, _| {
            next += 1;
            Ok(next)
        });
        table.expect_remove().times(3).returning(|_| Ok(()));

        let bridge = bridge(table);
        for _ in 0..3 {
            bridge.allocate(32).unwrap();
        }
        assert_eq!(bridge.len(), 3);
        assert_eq!(bridge.manager().live_segments(), 3);

        assert_eq!(bridge.release_all(), 3);
        assert!(bridge.is_empty());
        assert_eq!(bridge.manager().live_segments(), 0);
    }
}
