//! A single cluster member: its identity, its flags and the process it runs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use derive_more::Display;
use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::error::ChainError;
use crate::flags::{FlagName, FlagSet};
use crate::log_scan::{self, BlockHeights};
use crate::process::{check_file, run_checked, ProcessHandle};
use crate::rpc::{self, RpcResponse};

pub const KEY_FILE: &str = "p2p_secret";
pub const BACKUP_DIR: &str = "backup-stash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Role {
    #[display(fmt = "validator")]
    Validator,
    #[display(fmt = "non-validator")]
    NonValidator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NodeState {
    NotStarted,
    Running,
    Stopped,
}

/// The process handle only exists while the node runs.
#[derive(Debug)]
enum Lifecycle {
    NotStarted,
    Running(ProcessHandle),
    Stopped,
}

/// One node of a local chain.
///
/// Flags, binary and chainspec can be changed at any time; they are read when the node is next
/// started. Log-derived queries read the log file of the most recent start, even after the node
/// was stopped.
#[derive(Debug)]
pub struct Node {
    index: usize,
    account: String,
    role: Role,
    binary: PathBuf,
    chainspec: PathBuf,
    base_path: PathBuf,
    log_dir: PathBuf,
    flags: FlagSet,
    lifecycle: Lifecycle,
    log_file: Option<PathBuf>,
}

impl Node {
    pub fn new(
        index: usize,
        account: impl Into<String>,
        role: Role,
        binary: impl Into<PathBuf>,
        chainspec: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            account: account.into(),
            role,
            binary: binary.into(),
            chainspec: chainspec.into(),
            base_path: base_path.into(),
            log_dir: log_dir.into(),
            flags: FlagSet::default(),
            lifecycle: Lifecycle::NotStarted,
            log_file: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn chainspec(&self) -> &Path {
        &self.chainspec
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn key_file(&self) -> PathBuf {
        self.base_path.join(KEY_FILE)
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut FlagSet {
        &mut self.flags
    }

    pub fn set_binary(&mut self, binary: impl Into<PathBuf>) {
        self.binary = binary.into();
    }

    pub fn set_chainspec(&mut self, chainspec: impl Into<PathBuf>) {
        self.chainspec = chainspec.into();
    }

    pub fn state(&self) -> NodeState {
        match self.lifecycle {
            Lifecycle::NotStarted => NodeState::NotStarted,
            Lifecycle::Running(_) => NodeState::Running,
            Lifecycle::Stopped => NodeState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Running(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.lifecycle {
            Lifecycle::Running(process) => process.id(),
            _ => None,
        }
    }

    fn std_args(&self) -> Vec<OsString> {
        vec![
            "--base-path".into(),
            self.base_path.clone().into(),
            "--chain".into(),
            self.chainspec.clone().into(),
        ]
    }

    fn node_args(&self, backup: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--node-key-file".into(),
            self.key_file().into(),
            "--enable-log-reloading".into(),
        ];
        if backup {
            args.push("--backup-path".into());
            args.push(self.base_path.join(BACKUP_DIR).into());
        }
        args
    }

    /// Spawns the node. `run_label` names the log file (`<run_label><index>.log`) and the
    /// `--name` the node reports.
    pub async fn start(&mut self, run_label: &str, backup: bool) -> Result<()> {
        if self.is_running() {
            return Err(ChainError::AlreadyRunning(self.index).into());
        }
        check_file(&self.binary)?;
        check_file(&self.chainspec)?;

        let name = format!("{}{}", run_label, self.index);
        let mut args: Vec<OsString> = vec!["--name".into(), name.clone().into()];
        args.extend(self.std_args());
        args.extend(self.node_args(backup));
        args.extend(self.flags.to_args().into_iter().map(OsString::from));

        let log_file = self.log_dir.join(format!("{}.log", name));
        let process = ProcessHandle::spawn(&self.binary, &args, &log_file)
            .with_context(|| format!("Starting node {}", self.index))?;

        info!(
            "node {}: started {} as `{}`; pid={:?}",
            self.index,
            self.binary.display(),
            name,
            process.id()
        );

        self.log_file = Some(log_file);
        self.lifecycle = Lifecycle::Running(process);
        Ok(())
    }

    /// Kills the node with SIGKILL. Does nothing unless the node is running.
    pub fn stop(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(process) => {
                info!("node {}: killing pid={:?}", self.index, process.id());
                process.kill()
            }
            previous => {
                debug!("node {}: not running, nothing to stop", self.index);
                self.lifecycle = previous;
                Ok(())
            }
        }
    }

    /// Deletes the node's database. Stop the node first.
    pub async fn purge(&self) -> Result<()> {
        check_file(&self.binary)?;

        let mut command = Command::new(&self.binary);
        command
            .arg("purge-chain")
            .arg("-y")
            .args(self.std_args());

        match run_checked(&mut command).await {
            Ok(_) => {
                info!("node {}: database purged", self.index);
                Ok(())
            }
            Err(e) if matches!(
                e.downcast_ref::<ChainError>(),
                Some(ChainError::CommandFailed { .. })
            ) =>
            {
                warn!("node {}: purge-chain failed; error={}", self.index, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_log(&self) -> Result<Option<String>> {
        let Some(path) = &self.log_file else {
            return Ok(None);
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Reading log {}", path.display())),
        }
    }

    /// Best and finalized heights from the last progress line in the log,
    /// [`BlockHeights::UNKNOWN`] when there is none.
    pub async fn highest_block(&self) -> Result<BlockHeights> {
        let log = self.read_log().await?;
        Ok(log
            .as_deref()
            .and_then(log_scan::last_heights)
            .unwrap_or_default())
    }

    /// Whether the most recent authority report says all authorities are known.
    pub async fn check_authorities(&self) -> Result<bool> {
        let log = self.read_log().await?;
        Ok(log
            .as_deref()
            .and_then(log_scan::last_authorities)
            .map(|count| count.is_complete())
            .unwrap_or(false))
    }

    fn port_flag(&self, name: FlagName) -> Result<u16> {
        self.flags
            .value(&name)
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                ChainError::MissingFlag {
                    index: self.index,
                    flag: name.to_string(),
                }
                .into()
            })
    }

    pub fn rpc_port(&self) -> Result<u16> {
        self.port_flag(FlagName::RpcPort)
    }

    pub fn ws_port(&self) -> Result<u16> {
        self.port_flag(FlagName::WsPort)
    }

    /// Calls `method` on the node's RPC endpoint. Returns `None` without touching the network
    /// when the node is not running.
    pub async fn rpc(&self, method: &str, params: Value) -> Result<Option<RpcResponse>> {
        if !self.is_running() {
            warn!(
                "node {}: cannot call `{}` because the node is not running",
                self.index, method
            );
            return Ok(None);
        }

        let port = self.rpc_port()?;
        rpc::call(port, method, params).await.map(Some)
    }

    /// Hash of the block at `height`; `None` if the node is down or does not know the block.
    pub async fn get_hash(&self, height: u64) -> Result<Option<String>> {
        match self.rpc("chain_getBlockHash", json!([height])).await? {
            Some(response) => Ok(response.into_result()?.as_str().map(str::to_string)),
            None => Ok(None),
        }
    }

    /// Changes log verbosity of `target` on the fly.
    pub async fn set_log_level(&self, target: &str, level: &str) -> Result<Option<RpcResponse>> {
        self.rpc(
            "system_addLogFilter",
            json!([format!("{}={}", target, level)]),
        )
        .await
    }

    /// Chain state after `block` (or the best block) as exported by the binary.
    ///
    /// The export needs exclusive access to the database, so a running node yields an empty
    /// object.
    pub async fn export_state(&self, block: Option<u64>) -> Result<Value> {
        if self.is_running() {
            warn!(
                "node {}: cannot export the state of a running node",
                self.index
            );
            return Ok(Value::Object(Map::new()));
        }
        check_file(&self.binary)?;

        let mut command = Command::new(&self.binary);
        command.arg("export-state").args(self.std_args());
        if let Some(block) = block {
            command.arg(block.to_string());
        }

        let output = run_checked(&mut command).await?;
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Parsing state exported by node {}", self.index))
    }

    /// The node's p2p address, `/dns4/localhost/tcp/<port>/p2p/<peer id>`.
    ///
    /// `port` defaults to the node's `--port` flag; `None` is returned when neither is known.
    pub async fn address(&self, port: Option<u16>) -> Result<Option<String>> {
        let port = match port {
            Some(port) => port,
            None => match self.flags.value(&FlagName::Port) {
                Some(value) => value
                    .parse()
                    .with_context(|| format!("Invalid --port `{}` on node {}", value, self.index))?,
                None => return Ok(None),
            },
        };
        check_file(&self.binary)?;

        let mut command = Command::new(&self.binary);
        command
            .arg("key")
            .arg("inspect-node-key")
            .arg("--file")
            .arg(self.key_file());
        let output = run_checked(&mut command).await?;
        let peer_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(Some(format!("/dns4/localhost/tcp/{}/p2p/{}", port, peer_id)))
    }

    /// `localhost:<port>`, with `port` defaulting to the node's `--validator-port` flag.
    pub fn validator_address(&self, port: Option<u16>) -> Option<String> {
        match port {
            Some(port) => Some(format!("localhost:{}", port)),
            None => self
                .flags
                .value(&FlagName::ValidatorPort)
                .map(|port| format!("localhost:{}", port)),
        }
    }
}
