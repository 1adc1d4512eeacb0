//! Ownership of spawned node processes, and the one-shot subcommands run against a binary.

use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use anyhow::{Context, Result};
use log::debug;
use tokio::process::{Child, Command};

use crate::error::ChainError;

/// Ensure the provided path points to an existing file.
pub fn check_file(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(ChainError::FileNotFound(path.to_path_buf()).into())
    }
}

/// A running node process. Standard output is discarded and standard error goes to `log_file`.
///
/// Dropping the handle kills the process, so a harness that goes out of scope never leaves
/// orphaned nodes behind.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    log_file: PathBuf,
}

impl ProcessHandle {
    pub fn spawn<I, S>(program: &Path, args: I, log_file: &Path) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let log = File::create(log_file)
            .with_context(|| format!("Creating log file {}", log_file.display()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Spawning {}", program.display()))?;

        debug!(
            "Spawned {} (pid={:?}); log={}",
            program.display(),
            child.id(),
            log_file.display()
        );

        Ok(Self {
            child,
            log_file: log_file.to_path_buf(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Sends SIGKILL and returns immediately; the exit is reaped in the background.
    pub fn kill(mut self) -> Result<()> {
        let pid = self.child.id();
        self.child
            .start_kill()
            .with_context(|| format!("Sending SIGKILL to pid {:?}", pid))
    }
}

/// Runs `command` to completion and fails with [`ChainError::CommandFailed`] on a non-zero exit.
///
/// Standard output and error are always captured, overriding any redirection set on `command`.
/// Callers that need the output in a file write `Output::stdout` themselves.
pub async fn run_checked(command: &mut Command) -> Result<Output> {
    let description = describe(command);
    debug!("Running {}", description);

    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Running {}", description))?;

    if !output.status.success() {
        return Err(ChainError::CommandFailed {
            command: description,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    Ok(output)
}

pub(crate) fn describe(command: &Command) -> String {
    let std_command = command.as_std();
    let mut description = std_command.get_program().to_string_lossy().into_owned();
    for arg in std_command.get_args() {
        description.push(' ');
        description.push_str(&arg.to_string_lossy());
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_checked_captures_redirected_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let redirect = dir.path().join("out.txt");

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg("echo spec")
            .stdout(File::create(&redirect).unwrap());
        let output = run_checked(&mut command).await.unwrap();

        assert_eq!(output.stdout, b"spec\n");
        assert!(std::fs::read(&redirect).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("echo broken >&2; exit 3");
        let err = run_checked(&mut command).await.unwrap_err();
        match err.downcast_ref::<ChainError>() {
            Some(ChainError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
