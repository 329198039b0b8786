/*!
 * Shared Memory Types
 * Errors, error kinds, and segment statistics
 */

use crate::core::types::{Pid, RawShmId, Size, Uid};
use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

/// Failure classes reported across the foreign-function boundary
///
/// The discriminants are the negative sentinels returned by the C ABI. Valid
/// segment ids are never negative, so a sentinel cannot be mistaken for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ErrorKind {
    /// Bad size or buffer supplied by the caller
    InvalidArgument = -1,
    /// Configured or kernel allocation limits reached
    ResourceExhausted = -2,
    /// Unknown, released, or inaccessible segment
    InvalidHandle = -3,
    /// Attach failed for a reason other than an invalid handle
    MapFailure = -4,
}

impl ErrorKind {
    /// Sentinel value returned across the C ABI
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::InvalidArgument),
            -2 => Some(Self::ResourceExhausted),
            -3 => Some(Self::InvalidHandle),
            -4 => Some(Self::MapFailure),
            _ => None,
        }
    }
}

fn errno_desc(errno: &i32) -> Errno {
    Errno::from_raw(*errno)
}

/// Shared memory error types
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ShmError {
    #[error("Invalid size: {0}")]
    #[diagnostic(
        code(shm::invalid_size),
        help("Sizes must be positive byte counts.")
    )]
    InvalidSize(String),

    #[error("Segment size exceeds limit: requested {requested}, max {max}")]
    #[diagnostic(
        code(shm::size_exceeded),
        help("Request a smaller segment or raise SHM_BRIDGE_MAX_SEGMENT_SIZE.")
    )]
    SizeExceeded { requested: Size, max: Size },

    #[error("Kernel rejected segment size {requested}: {}", errno_desc(.errno))]
    #[diagnostic(
        code(shm::kernel_rejected_size),
        help("The size is outside kernel.shmmin..kernel.shmmax.")
    )]
    KernelRejectedSize { requested: Size, errno: i32 },

    #[error("Live segment limit exceeded: {0}/{1}")]
    #[diagnostic(
        code(shm::segment_limit),
        help("Release unused segments or raise SHM_BRIDGE_MAX_SEGMENTS.")
    )]
    SegmentLimitExceeded(usize, usize),

    #[error("Shared memory limit exceeded: {current} + {requested} > {max} bytes")]
    #[diagnostic(
        code(shm::memory_limit),
        help("Release unused segments or raise SHM_BRIDGE_MAX_TOTAL_BYTES.")
    )]
    MemoryLimitExceeded {
        current: Size,
        requested: Size,
        max: Size,
    },

    #[error("Kernel shared memory exhausted: {}", errno_desc(.errno))]
    #[diagnostic(
        code(shm::exhausted),
        help("Check kernel.shmall and kernel.shmmni, or sweep orphaned segments.")
    )]
    Exhausted { errno: i32 },

    #[error("Segment allocation failed: {}", errno_desc(.errno))]
    #[diagnostic(code(shm::allocation_failed))]
    AllocationFailed { errno: i32 },

    #[error("Read of {requested} bytes exceeds segment {id} of {allocated} bytes")]
    #[diagnostic(
        code(shm::read_out_of_bounds),
        help("Read at most the size passed to allocate.")
    )]
    ReadOutOfBounds {
        id: RawShmId,
        requested: Size,
        allocated: Size,
    },

    #[error("Output buffer of {available} bytes cannot hold {required} bytes")]
    #[diagnostic(code(shm::buffer_too_small))]
    BufferTooSmall { required: Size, available: Size },

    #[error("Invalid segment handle: {0}")]
    #[diagnostic(
        code(shm::invalid_handle),
        help("The segment was never allocated here, or has already been released.")
    )]
    InvalidHandle(RawShmId),

    #[error("Permission denied for segment {id}: {}", errno_desc(.errno))]
    #[diagnostic(code(shm::permission_denied))]
    PermissionDenied { id: RawShmId, errno: i32 },

    #[error("Failed to map segment {id}: {}", errno_desc(.errno))]
    #[diagnostic(code(shm::map_failed))]
    MapFailed { id: RawShmId, errno: i32 },

    #[error("Segment table unavailable: {0}")]
    #[diagnostic(
        code(shm::table_unavailable),
        help("Orphan sweeping requires /proc/sysvipc/shm.")
    )]
    TableUnavailable(String),
}

impl ShmError {
    /// Coarse class used at the foreign-function boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShmError::InvalidSize(_)
            | ShmError::SizeExceeded { .. }
            | ShmError::KernelRejectedSize { .. }
            | ShmError::ReadOutOfBounds { .. }
            | ShmError::BufferTooSmall { .. } => ErrorKind::InvalidArgument,
            ShmError::SegmentLimitExceeded(..)
            | ShmError::MemoryLimitExceeded { .. }
            | ShmError::Exhausted { .. }
            | ShmError::AllocationFailed { .. } => ErrorKind::ResourceExhausted,
            ShmError::InvalidHandle(_) | ShmError::PermissionDenied { .. } => {
                ErrorKind::InvalidHandle
            }
            ShmError::MapFailed { .. } | ShmError::TableUnavailable(_) => ErrorKind::MapFailure,
        }
    }

    /// Raw OS errno, when the failure came from a syscall
    pub fn errno(&self) -> Option<i32> {
        match self {
            ShmError::KernelRejectedSize { errno, .. }
            | ShmError::Exhausted { errno }
            | ShmError::AllocationFailed { errno }
            | ShmError::PermissionDenied { errno, .. }
            | ShmError::MapFailed { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Kernel metadata for one segment (`IPC_STAT`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SegmentStats {
    pub id: RawShmId,
    pub size: Size,
    pub attach_count: u64,
    pub creator_pid: Pid,
    pub last_pid: Pid,
    pub owner_uid: Uid,
    pub mode: u32,
}

impl SegmentStats {
    /// Permission bits without the kernel's status flags
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }
}
