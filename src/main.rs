/*!
 * shm-sweep
 *
 * Lists and removes System V segments leaked by crashed callers.
 *
 * Not specific to this library: any private, unattached segment owned by the
 * current user whose creator has exited is an orphan, whichever program
 * leaked it. Run with SHM_SWEEP_DRY_RUN=1 first to review the list.
 *
 * Environment variables:
 * - SHM_SWEEP_DRY_RUN: list orphans without removing them
 * - SHM_SWEEP_JSON: print the report as JSON on stdout (logs go to stderr)
 * - RUST_LOG / SHM_BRIDGE_TRACE_JSON: logging, as for the library
 */

use shm_bridge::init_tracing;

#[cfg(target_os = "linux")]
fn main() -> miette::Result<()> {
    use miette::IntoDiagnostic;
    use shm_bridge::core::config::env_flag;
    use tracing::{info, warn};

    init_tracing();

    let dry_run = env_flag("SHM_SWEEP_DRY_RUN");
    let report = shm_bridge::sweep(dry_run)?;

    if env_flag("SHM_SWEEP_JSON") {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        return Ok(());
    }

    for orphan in &report.orphans {
        info!(
            segment_id = orphan.id,
            size = orphan.size,
            creator_pid = orphan.creator_pid,
            "{}",
            if dry_run { "Would remove" } else { "Orphan" }
        );
    }
    for failure in &report.failed {
        warn!(segment_id = failure.id, error = %failure.error, "Not removed");
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> miette::Result<()> {
    init_tracing();
    Err(miette::miette!(
        "shm-sweep reads /proc/sysvipc/shm and only runs on Linux"
    ))
}
