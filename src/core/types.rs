/*!
 * Core Types
 * Common types used across the bridge
 */

/// Kernel shared memory identifier, as returned by `shmget`
pub type RawShmId = i32;

/// Process ID type
pub type Pid = i32;

/// User ID type
pub type Uid = u32;

/// Size type for memory operations
pub type Size = usize;
