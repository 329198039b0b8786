/*!
 * Orphan Sweep
 * Find and remove segments leaked by crashed callers
 *
 * Segments outlive the process that created them. A caller that dies before
 * releasing leaves its segment in the kernel until reboot; this module lists
 * such segments from procfs and removes them.
 *
 * The orphan test knows nothing about who created a segment beyond its uid
 * and pid, so segments leaked by unrelated programs of the same user match
 * too. Callers should list with `dry_run` before removing.
 */

use super::sysv::SysvTable;
use super::traits::SegmentTable;
use super::types::{ShmError, ShmResult};
use crate::core::limits::PROC_SYSVIPC_SHM;
use crate::core::types::{Pid, RawShmId, Size, Uid};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{geteuid, Pid as NixPid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// One row of `/proc/sysvipc/shm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SysvSegmentInfo {
    pub key: i64,
    pub id: RawShmId,
    pub perms: u32,
    pub size: Size,
    pub creator_pid: Pid,
    pub last_pid: Pid,
    pub attach_count: u64,
    pub uid: Uid,
}

impl SysvSegmentInfo {
    /// Created with `IPC_PRIVATE`, as every bridge segment is
    pub fn is_private(&self) -> bool {
        self.key == libc::IPC_PRIVATE as i64
    }
}

/// Segment that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub id: RawShmId,
    pub error: ShmError,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub orphans: Vec<SysvSegmentInfo>,
    pub removed: Vec<RawShmId>,
    pub failed: Vec<SweepFailure>,
}

const REQUIRED_COLUMNS: [&str; 8] = [
    "key", "shmid", "perms", "size", "cpid", "lpid", "nattch", "uid",
];

/// Parse the text of `/proc/sysvipc/shm`
///
/// Columns are located by header name; the kernel has appended columns
/// (rss, swap) over time.
pub fn parse_proc_table(text: &str) -> ShmResult<Vec<SysvSegmentInfo>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| ShmError::TableUnavailable("empty segment table".to_string()))?;

    let columns: HashMap<&str, usize> = header
        .split_whitespace()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    if let Some(missing) = REQUIRED_COLUMNS.iter().find(|name| !columns.contains_key(*name)) {
        return Err(ShmError::TableUnavailable(format!(
            "missing column '{}'",
            missing
        )));
    }

    lines
        .enumerate()
        .map(|(row, line)| {
            let row = Row {
                columns: &columns,
                fields: line.split_whitespace().collect(),
                line_no: row + 2,
            };
            row.parse()
        })
        .collect()
}

struct Row<'a> {
    columns: &'a HashMap<&'a str, usize>,
    fields: Vec<&'a str>,
    line_no: usize,
}

impl<'a> Row<'a> {
    fn parse(&self) -> ShmResult<SysvSegmentInfo> {
        Ok(SysvSegmentInfo {
            key: self.number("key")?,
            id: self.number("shmid")?,
            perms: self.octal("perms")?,
            size: self.number("size")?,
            creator_pid: self.number("cpid")?,
            last_pid: self.number("lpid")?,
            attach_count: self.number("nattch")?,
            uid: self.number("uid")?,
        })
    }

    fn raw(&self, name: &str) -> ShmResult<&'a str> {
        self.columns
            .get(name)
            .and_then(|&i| self.fields.get(i).copied())
            .ok_or_else(|| {
                ShmError::TableUnavailable(format!("line {}: missing '{}'", self.line_no, name))
            })
    }

    fn number<T: FromStr>(&self, name: &str) -> ShmResult<T> {
        let raw = self.raw(name)?;
        raw.parse().map_err(|_| self.bad(name, raw))
    }

    fn octal(&self, name: &str) -> ShmResult<u32> {
        let raw = self.raw(name)?;
        u32::from_str_radix(raw, 8).map_err(|_| self.bad(name, raw))
    }

    fn bad(&self, name: &str, value: &str) -> ShmError {
        ShmError::TableUnavailable(format!("line {}: bad {} '{}'", self.line_no, name, value))
    }
}

/// Read every System V segment on the host
pub fn list_segments() -> ShmResult<Vec<SysvSegmentInfo>> {
    let text = std::fs::read_to_string(PROC_SYSVIPC_SHM)
        .map_err(|e| ShmError::TableUnavailable(format!("{}: {}", PROC_SYSVIPC_SHM, e)))?;
    parse_proc_table(&text)
}

/// Whether a process with this pid still exists
///
/// `EPERM` means it exists under another user.
pub fn process_alive(pid: Pid) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(NixPid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// A private segment owned by `uid`, unattached, whose creator has exited
///
/// Matches leaks from any program running as `uid`, not only this library.
pub fn is_orphan<F>(info: &SysvSegmentInfo, uid: Uid, alive: F) -> bool
where
    F: Fn(Pid) -> bool,
{
    info.is_private() && info.uid == uid && info.attach_count == 0 && !alive(info.creator_pid)
}

/// Remove orphans from `entries` through `table`
pub fn sweep_orphans<F>(
    table: &dyn SegmentTable,
    entries: &[SysvSegmentInfo],
    uid: Uid,
    alive: F,
    dry_run: bool,
) -> SweepReport
where
    F: Fn(Pid) -> bool,
{
    let mut report = SweepReport {
        dry_run,
        scanned: entries.len(),
        ..Default::default()
    };

    for info in entries.iter().filter(|info| is_orphan(info, uid, &alive)) {
        report.orphans.push(info.clone());

        if dry_run {
            debug!(segment_id = info.id, size = info.size, "Orphaned segment (dry run)");
            continue;
        }

        match table.remove(info.id) {
            Ok(()) => {
                info!(
                    segment_id = info.id,
                    size = info.size,
                    creator_pid = info.creator_pid,
                    "Removed orphaned segment"
                );
                report.removed.push(info.id);
            }
            Err(error) => {
                warn!(segment_id = info.id, error = %error, "Failed to remove orphaned segment");
                report.failed.push(SweepFailure { id: info.id, error });
            }
        }
    }

    report
}

/// Sweep the host's orphaned segments owned by the effective user
pub fn sweep(dry_run: bool) -> ShmResult<SweepReport> {
    let entries = list_segments()?;
    let uid = geteuid().as_raw();
    let report = sweep_orphans(&SysvTable::new(), &entries, uid, process_alive, dry_run);

    info!(
        scanned = report.scanned,
        orphans = report.orphans.len(),
        removed = report.removed.len(),
        failed = report.failed.len(),
        dry_run,
        "Orphan sweep complete"
    );
    Ok(report)
}
