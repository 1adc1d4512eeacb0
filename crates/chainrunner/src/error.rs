use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures the harness reports with enough structure for a test script to react to them.
///
/// Everything public returns `anyhow::Result`; match on these with
/// `err.downcast_ref::<ChainError>()`.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("`{command}` exited with {status}; stderr={stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("node {0} is already running")]
    AlreadyRunning(usize),

    #[error("node {0} has already been started, genesis can no longer change")]
    AlreadyStarted(usize),

    #[error("no node with index {index}; the chain has {len} nodes")]
    NoSuchNode { index: usize, len: usize },

    #[error("node {index} has no usable `--{flag}` flag")]
    MissingFlag { index: usize, flag: String },

    #[error("timed out after {timeout:?}: {condition}")]
    Timeout {
        condition: String,
        timeout: Duration,
    },

    #[error("RPC transport error: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChainError::Timeout { .. })
    }
}
