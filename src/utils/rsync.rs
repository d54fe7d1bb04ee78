//! Mirror invoker - brings `<dest>/current` up to date with the source
//!
//! One rsync call per run. rsync's own exit codes are unreliable across
//! versions and partial-transfer cases, so success is judged the way the
//! output reads: the `total size is` summary must be present and the
//! `rsync error` marker absent.

use crate::config::BackupConfig;
use crate::report::RunReport;
use crate::utils::executor::CommandExecutor;
use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marker rsync prints at the end of a successful transfer summary.
pub const SUCCESS_MARKER: &str = "total size is";

/// Marker rsync prints on transfer errors.
pub const ERROR_MARKER: &str = "rsync error";

/// Resolved exclude-pattern file, if one is configured and present.
pub fn exclude_file_path(config: &BackupConfig) -> Option<PathBuf> {
    let base = config
        .exclude_base
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let path = base.join(&config.exclude_file);
    path.exists().then_some(path)
}

/// Build the rsync argument vector for one mirror call.
pub fn build_args(config: &BackupConfig) -> Vec<String> {
    let mut args: Vec<String> = config.rsync_switches.clone();

    if let Some(exclude) = exclude_file_path(config) {
        args.push("--exclude-from".to_string());
        args.push(exclude.display().to_string());
    }

    if config.source_is_remote() {
        args.push("-e".to_string());
        args.push("ssh".to_string());
    }

    args.push(format!("{}/", config.source));
    args.push(config.current_dir().display().to_string());
    args
}

/// Synchronize the source into `<dest>/current`.
///
/// Fatal on a missing success marker, a present error marker, or an empty
/// `current` afterwards; an empty result after a sync that should have moved
/// data indicates a misconfiguration and must not be promoted into the
/// rotation. The command and its output are recorded either way.
pub fn mirror(
    config: &BackupConfig,
    executor: &dyn CommandExecutor,
    report: &mut RunReport,
) -> Result<()> {
    let args = build_args(config);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    info!("Mirroring {} into {:?}", config.source, config.current_dir());

    let result = executor.run(&config.rsync_bin, &arg_refs, config.command_timeout())?;
    report.record(
        format!("{} {}", config.rsync_bin, args.join(" ")),
        result.output.clone(),
    );

    if !result.output.contains(SUCCESS_MARKER) {
        bail!("sync output is missing the '{}' marker", SUCCESS_MARKER);
    }
    if result.output.contains(ERROR_MARKER) {
        bail!("sync reported an error");
    }

    let current = config.current_dir();
    if is_empty_dir(&current) {
        bail!("{:?} is an empty dir after sync", current);
    }

    debug!("Mirror complete");
    Ok(())
}

fn is_empty_dir(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
