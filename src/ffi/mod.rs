/*!
 * Foreign Function Interface
 * C ABI over the segment manager for managed-language callers
 */

pub mod bridge;
pub mod exports;
pub mod last_error;

pub use bridge::{positive_size, SegmentBridge};
