/*!
 * Bridge Configuration
 * Allocation limits, loaded from the environment with compiled-in defaults
 */

use super::limits::{MAX_LIVE_SEGMENTS, MAX_SEGMENT_SIZE, MAX_TOTAL_BYTES};
use super::types::Size;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_MAX_SEGMENT_SIZE: &str = "SHM_BRIDGE_MAX_SEGMENT_SIZE";
pub const ENV_MAX_SEGMENTS: &str = "SHM_BRIDGE_MAX_SEGMENTS";
pub const ENV_MAX_TOTAL_BYTES: &str = "SHM_BRIDGE_MAX_TOTAL_BYTES";

/// Limits enforced by a `SegmentManager` before any kernel call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShmConfig {
    /// Largest size a single `allocate` may request
    pub max_segment_size: Size,
    /// Segments the manager may own at once
    pub max_live_segments: usize,
    /// Sum of sizes across owned segments
    pub max_total_bytes: Size,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            max_segment_size: MAX_SEGMENT_SIZE,
            max_live_segments: MAX_LIVE_SEGMENTS,
            max_total_bytes: MAX_TOTAL_BYTES,
        }
    }
}

impl ShmConfig {
    /// Load limits from the process environment
    ///
    /// Environment variables:
    /// - SHM_BRIDGE_MAX_SEGMENT_SIZE: per-segment byte ceiling (default: 100MB)
    /// - SHM_BRIDGE_MAX_SEGMENTS: live segment count (default: 64)
    /// - SHM_BRIDGE_MAX_TOTAL_BYTES: byte total across live segments (default: 500MB)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load limits through an arbitrary key lookup
    ///
    /// Missing, zero, or unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_segment_size: parse_limit(&lookup, ENV_MAX_SEGMENT_SIZE, defaults.max_segment_size),
            max_live_segments: parse_limit(&lookup, ENV_MAX_SEGMENTS, defaults.max_live_segments),
            max_total_bytes: parse_limit(&lookup, ENV_MAX_TOTAL_BYTES, defaults.max_total_bytes),
        }
    }

    pub fn with_max_segment_size(mut self, max: Size) -> Self {
        self.max_segment_size = max;
        self
    }

    pub fn with_max_live_segments(mut self, max: usize) -> Self {
        self.max_live_segments = max;
        self
    }

    pub fn with_max_total_bytes(mut self, max: Size) -> Self {
        self.max_total_bytes = max;
        self
    }
}

fn parse_limit<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => {
            warn!(key, default, "Limit must be positive, using default");
            default
        }
        Ok(value) => value,
        Err(e) => {
            warn!(key, value = %raw, error = %e, default, "Ignoring unparseable limit");
            default
        }
    }
}

/// Interpret an environment flag ("1" or "true")
pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
