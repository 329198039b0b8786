/*!
 * C ABI Exports
 *
 * Every function returns a non-negative value on success and a negative
 * `ErrorKind` code on failure. After a failure, `shm_bridge_last_errno` and
 * `shm_bridge_last_error_message` describe it on the calling thread.
 *
 * Segments outlive this process. If the host crashes before releasing, run
 * `shm-sweep` to reclaim them.
 */

use super::bridge::SegmentBridge;
use super::last_error::{clear_last_error, last_error, set_last_error};
use crate::ipc::shm::{SegmentManager, ShmError};
use crate::monitoring::init_tracing;
use std::ptr;
use std::slice;
use std::sync::LazyLock;
use tracing::debug;

// Process-wide bridge, configured from the environment on first use
static BRIDGE: LazyLock<SegmentBridge> =
    LazyLock::new(|| SegmentBridge::new(SegmentManager::from_env()));

fn report(err: ShmError) -> i32 {
    let code = err.kind().code();
    debug!(code, error = %err, "Bridge call failed");
    set_last_error(err);
    code
}

fn finish<T>(result: Result<T, ShmError>, ok: impl FnOnce(T) -> i32) -> i32 {
    match result {
        Ok(value) => {
            clear_last_error();
            ok(value)
        }
        Err(e) => report(e),
    }
}

/// Allocate an owner-only segment of `size` bytes
///
/// Returns the segment id, or a negative error code.
#[no_mangle]
pub extern "C" fn shm_bridge_allocate(size: i32) -> i32 {
    finish(BRIDGE.allocate(size), |id| id)
}

/// Copy `size` bytes of segment `handle` into `out`
///
/// Returns `size`, or a negative error code with `out` untouched.
/// The handle is checked first: an unknown or released handle yields
/// `InvalidHandle` whatever `size` and `out` are. A null `out` counts as
/// an empty buffer.
///
/// # Safety
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shm_bridge_read(
    handle: i32,
    size: i32,
    out: *mut u8,
    out_len: usize,
) -> i32 {
    let out: &mut [u8] = if out.is_null() {
        &mut []
    } else {
        // SAFETY: non-null and valid for out_len bytes per the caller contract.
        unsafe { slice::from_raw_parts_mut(out, out_len) }
    };
    finish(BRIDGE.read_into(handle, size, out), |n| n as i32)
}

/// Destroy segment `handle`
///
/// Returns 0, or a negative error code. Releasing twice fails.
#[no_mangle]
pub extern "C" fn shm_bridge_release(handle: i32) -> i32 {
    finish(BRIDGE.release(handle), |()| 0)
}

/// OS errno behind this thread's last failure, or 0
#[no_mangle]
pub extern "C" fn shm_bridge_last_errno() -> i32 {
    last_error().and_then(|e| e.errno()).unwrap_or(0)
}

/// Copy this thread's last error message into `buf` as a NUL-terminated string
///
/// Truncates to `len - 1` bytes. Returns the full message length in bytes,
/// 0 when the last call succeeded.
///
/// # Safety
/// `buf` must be null or valid for writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shm_bridge_last_error_message(buf: *mut u8, len: usize) -> i32 {
    let message = last_error().map(|e| e.to_string()).unwrap_or_default();

    if !buf.is_null() && len > 0 {
        let n = message.len().min(len - 1);
        // SAFETY: n + 1 <= len, and buf is valid for len bytes.
        unsafe {
            ptr::copy_nonoverlapping(message.as_ptr(), buf, n);
            *buf.add(n) = 0;
        }
    }

    i32::try_from(message.len()).unwrap_or(i32::MAX)
}

/// Install the tracing subscriber for hosts without their own
///
/// Returns 1 if installed, 0 if a subscriber was already present.
#[no_mangle]
pub extern "C" fn shm_bridge_init_logging() -> i32 {
    i32::from(init_tracing())
}
