/*!
 * System Limits and Constants
 *
 * Centralized location for shared memory limits and magic numbers.
 * - Security-critical constants are marked with [SECURITY]
 * - Linux-compatible values are marked with [LINUX-COMPAT]
 */

// =============================================================================
// SHARED MEMORY LIMITS
// =============================================================================

/// Largest segment a single allocation may request (100MB)
pub const MAX_SEGMENT_SIZE: usize = 100 * 1024 * 1024;

/// Live segments a single manager may own at once
pub const MAX_LIVE_SEGMENTS: usize = 64;

/// Bytes across all live segments of a manager (500MB)
pub const MAX_TOTAL_BYTES: usize = 500 * 1024 * 1024;

/// Owner read/write, no group or other access
/// [SECURITY]
pub const OWNER_ONLY_MODE: u32 = 0o600;

// =============================================================================
// COVERAGE HANDOFF
// =============================================================================

/// Size of an AFL-style edge coverage bitmap (64KB)
pub const COVERAGE_MAP_SIZE: usize = 1 << 16;

/// Environment variable an instrumented child reads its segment id from
pub const SHM_ID_ENV_VAR: &str = "__AFL_SHM_ID";

// =============================================================================
// PROCFS
// =============================================================================

/// Kernel listing of all System V segments
/// [LINUX-COMPAT]
pub const PROC_SYSVIPC_SHM: &str = "/proc/sysvipc/shm";
