//! Utilities for launching external commands with combined-output capture

use anyhow::{Context, Result};
use std::fs::File;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::debug;

use super::executor::CommandOutput;

fn wait_with_timeout(cmd: Command, program: &str, timeout: Option<Duration>) -> Result<Output> {
    if let Some(limit) = timeout {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build runtime for command timeout")?;
        runtime.block_on(async {
            let result =
                tokio::time::timeout(limit, tokio::process::Command::from(cmd).output()).await;
            match result {
                Ok(output) => output.context(format!("Failed to execute {}", program)),
                Err(_) => Err(anyhow::anyhow!("{} timed out after {:?}", program, limit)),
            }
        })
    } else {
        let mut cmd = cmd;
        cmd.output().context(format!("Failed to execute {}", program))
    }
}

/// Run a command with optional timeout, capturing combined stdout+stderr.
///
/// A nonzero exit status is returned as data: callers scan the output for
/// tool-specific markers and decide for themselves. `Err` means the command
/// did not run (missing binary, spawn failure, timeout).
pub fn run_command(program: &str, args: &[&str], timeout: Option<Duration>) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    debug!("Running command: {} {}", program, args.join(" "));

    let output = wait_with_timeout(cmd, program, timeout)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !combined.is_empty() {
        debug!("Command output: {}", combined.trim_end());
    }

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        output: combined,
    })
}

/// Run a command with stdout redirected to a file, capturing stderr.
///
/// Dump-to-file invocations use this instead of a shell redirect: the dump
/// tool writes through the redirected stdout while diagnostics still land in
/// the captured output.
pub fn run_command_stdout_file(
    program: &str,
    args: &[&str],
    stdout_file: File,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::from(stdout_file));
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    debug!("Running command (stdout to file): {} {}", program, args.join(" "));

    let output = wait_with_timeout(cmd, program, timeout)?;

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        output: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_captures_output() {
        let result = run_command("echo", &["hello"], None).unwrap();
        assert!(result.success);
        assert!(result.output.contains("hello"));
    }

    #[test]
    fn test_run_command_nonzero_exit_is_not_err() {
        let result = run_command("false", &[], None).unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_run_command_missing_binary_is_err() {
        let result = run_command("definitely-not-a-real-binary", &[], None);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_command_stdout_file_redirects() {
        use std::io::{Read, Seek};

        let mut tmp = tempfile::tempfile().unwrap();
        let clone = tmp.try_clone().unwrap();
        let result = run_command_stdout_file("echo", &["dumped"], clone, None).unwrap();
        assert!(result.success);

        tmp.rewind().unwrap();
        let mut contents = String::new();
        tmp.read_to_string(&mut contents).unwrap();
        assert!(contents.contains("dumped"));
    }
}
