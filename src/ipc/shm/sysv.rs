/*!
 * System V Segment Table
 * shmget/shmat/shmdt/shmctl behind the `SegmentTable` trait
 */

use super::traits::SegmentTable;
use super::types::{SegmentStats, ShmError, ShmResult};
use crate::core::types::{RawShmId, Size};
use nix::errno::Errno;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use tracing::{trace, warn};

/// The host kernel's System V segment table
#[derive(Debug, Clone, Copy, Default)]
pub struct SysvTable;

impl SysvTable {
    pub const fn new() -> Self {
        Self
    }
}

/// Read-only attachment of a segment, detached on drop
///
/// Lives only inside a single read; never stored or returned.
struct AttachedRegion {
    id: RawShmId,
    base: NonNull<u8>,
}

impl AttachedRegion {
    fn attach_read_only(id: RawShmId) -> ShmResult<Self> {
        // SAFETY: a null address lets the kernel pick the mapping location.
        let addr = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RDONLY) };
        if addr as isize == -1 {
            return Err(attach_error(id, Errno::last()));
        }

        let base = NonNull::new(addr.cast::<u8>()).ok_or(ShmError::MapFailed {
            id,
            errno: Errno::EFAULT as i32,
        })?;
        trace!(segment_id = id, "Attached segment read-only");
        Ok(Self { id, base })
    }

    /// Copy `buf.len()` bytes from the base of the mapping
    ///
    /// # Safety
    /// `buf.len()` must not exceed the segment size.
    unsafe fn copy_to(&self, buf: &mut [u8]) {
        ptr::copy_nonoverlapping(self.base.as_ptr(), buf.as_mut_ptr(), buf.len());
    }
}

impl Drop for AttachedRegion {
    fn drop(&mut self) {
        // SAFETY: base came from a successful shmat and is detached exactly once.
        let rc = unsafe { libc::shmdt(self.base.as_ptr() as *const libc::c_void) };
        if rc == -1 {
            warn!(segment_id = self.id, errno = %Errno::last(), "Failed to detach segment");
        } else {
            trace!(segment_id = self.id, "Detached segment");
        }
    }
}

fn attach_error(id: RawShmId, errno: Errno) -> ShmError {
    match errno {
        Errno::EINVAL | Errno::EIDRM => ShmError::InvalidHandle(id),
        Errno::EACCES => ShmError::PermissionDenied {
            id,
            errno: errno as i32,
        },
        _ => ShmError::MapFailed {
            id,
            errno: errno as i32,
        },
    }
}

fn control_error(id: RawShmId, errno: Errno) -> ShmError {
    match errno {
        Errno::EACCES | Errno::EPERM => ShmError::PermissionDenied {
            id,
            errno: errno as i32,
        },
        _ => ShmError::InvalidHandle(id),
    }
}

impl SegmentTable for SysvTable {
    fn create(&self, size: Size, mode: u32) -> ShmResult<RawShmId> {
        if size == 0 {
            return Err(ShmError::InvalidSize("0 bytes".to_string()));
        }

        let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
        // SAFETY: plain syscall, no pointers involved.
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, flags) };
        if id == -1 {
            let errno = Errno::last();
            return Err(match errno {
                Errno::EINVAL => ShmError::KernelRejectedSize {
                    requested: size,
                    errno: errno as i32,
                },
                Errno::ENOSPC | Errno::ENOMEM => ShmError::Exhausted {
                    errno: errno as i32,
                },
                _ => ShmError::AllocationFailed {
                    errno: errno as i32,
                },
            });
        }

        Ok(id)
    }

    fn read_into(&self, id: RawShmId, buf: &mut [u8]) -> ShmResult<()> {
        let region = AttachedRegion::attach_read_only(id)?;

        // The attachment pins the segment, so its size cannot change under us.
        let allocated = self.stat(id)?.size;
        if buf.len() > allocated {
            return Err(ShmError::ReadOutOfBounds {
                id,
                requested: buf.len(),
                allocated,
            });
        }

        // SAFETY: bounded by the kernel-reported segment size above.
        unsafe { region.copy_to(buf) };
        Ok(())
    }

    fn remove(&self, id: RawShmId) -> ShmResult<()> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
        if rc == -1 {
            return Err(control_error(id, Errno::last()));
        }
        Ok(())
    }

    fn stat(&self, id: RawShmId) -> ShmResult<SegmentStats> {
        let mut ds = MaybeUninit::<libc::shmid_ds>::zeroed();
        // SAFETY: ds is a valid, writable shmid_ds for IPC_STAT to fill.
        let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, ds.as_mut_ptr()) };
        if rc == -1 {
            return Err(control_error(id, Errno::last()));
        }
        // SAFETY: zero-initialized and filled by a successful IPC_STAT.
        let ds = unsafe { ds.assume_init() };

        Ok(SegmentStats {
            id,
            size: ds.shm_segsz as Size,
            attach_count: ds.shm_nattch as u64,
            creator_pid: ds.shm_cpid,
            last_pid: ds.shm_lpid,
            owner_uid: ds.shm_perm.uid,
            mode: ds.shm_perm.mode as u32,
        })
    }
}
