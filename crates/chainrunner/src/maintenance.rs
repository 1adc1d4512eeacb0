//! Operations on the chain as a whole that go beyond starting and stopping nodes.

use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde_json::Value;
use tokio::process::Command;

use crate::chain::{Chain, NodeSelection};
use crate::error::ChainError;
use crate::node::NodeState;
use crate::process::{check_file, run_checked};

impl Chain {
    /// Replaces the chainspec's state with the state of a live chain reachable at `ws_endpoint`,
    /// using the `fork-off` tool. Only allowed before any node was started.
    pub async fn fork(
        &self,
        forkoff_binary: impl AsRef<Path>,
        ws_endpoint: &str,
        snapshot_file: Option<&Path>,
    ) -> Result<()> {
        let forkoff = check_file(forkoff_binary.as_ref())?;
        let chainspec = check_file(self.chainspec())?;
        if let Some(node) = self.iter().find(|n| n.state() != NodeState::NotStarted) {
            return Err(ChainError::AlreadyStarted(node.index()).into());
        }

        let mut command = Command::new(&forkoff);
        command
            .arg("--ws-rpc-endpoint")
            .arg(ws_endpoint)
            .arg("--initial-spec-path")
            .arg(&chainspec)
            .arg("--combined-spec-path")
            .arg(&chainspec);
        if let Some(snapshot) = snapshot_file {
            command
                .arg("--use-snapshot-file")
                .arg("--snapshot-path")
                .arg(snapshot);
        }

        info!(
            "chain {}: forking state of {} into {}",
            self.path().display(),
            ws_endpoint,
            chainspec.display()
        );
        run_checked(&mut command)
            .await
            .context("Forking off the chain state")?;
        Ok(())
    }

    /// Submits `runtime` as a sudo runtime upgrade through node 0. Returns once the tool exits;
    /// the upgrade itself happens on a later block.
    pub async fn update_runtime(
        &self,
        tool: impl AsRef<Path>,
        sudo_seed: &str,
        runtime: impl AsRef<Path>,
    ) -> Result<()> {
        let tool = check_file(tool.as_ref())?;
        let runtime = check_file(runtime.as_ref())?;
        let port = self.node(0)?.rpc_port()?;

        let mut command = Command::new(&tool);
        command
            .arg("--url")
            .arg(format!("localhost:{}", port))
            .arg("--sudo-phrase")
            .arg(sudo_seed)
            .arg(&runtime);

        info!(
            "chain {}: sending runtime {} through port {}",
            self.path().display(),
            runtime.display(),
            port
        );
        run_checked(&mut command)
            .await
            .context("Sending the runtime upgrade")?;
        Ok(())
    }

    /// Logs best and finalized heights of the selected nodes and returns the finalized ones.
    pub async fn check_finalized(&self, selection: &NodeSelection) -> Result<Vec<i64>> {
        let indices = self.indices(selection)?;
        let heights = self.heights(selection).await?;

        let best: Vec<String> = heights.iter().map(|h| h.best.to_string()).collect();
        let finalized: Vec<i64> = heights.iter().map(|h| h.finalized).collect();
        info!("Blocks seen by nodes {:?}:", indices);
        info!("  Highest:   {}", best.join(" "));
        info!(
            "  Finalized: {}",
            finalized
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );

        Ok(finalized)
    }

    /// Logs host and runtime versions of the selected running nodes and returns the highest
    /// runtime `specVersion`, or `-1` if no node answered.
    pub async fn check_version(&self, selection: &NodeSelection) -> Result<i64> {
        let mut versions = Vec::new();
        for index in self.indices(selection)? {
            let node = &self[index];
            let Some(system) = node.rpc("system_version", Value::Null).await? else {
                continue;
            };
            let Some(runtime) = node.rpc("state_getRuntimeVersion", Value::Null).await? else {
                continue;
            };

            let host = system
                .result()
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();
            let spec_version = match runtime.into_result() {
                Ok(version) => version.get("specVersion").and_then(Value::as_i64),
                Err(e) => {
                    warn!("node {}: runtime version query failed; error={}", index, e);
                    None
                }
            };
            match spec_version {
                Some(version) => {
                    info!("node {}: host {}, runtime {}", index, host, version);
                    versions.push(version);
                }
                None => info!("node {}: host {}, runtime ERROR", index, host),
            }
        }

        let highest = versions.iter().copied().max().unwrap_or(-1);
        if versions.iter().any(|&v| v != highest) {
            error!("Nodes disagree on the runtime version: {:?}", versions);
        }
        Ok(highest)
    }

    /// Exports the state at `block` from every selected node and checks they are identical.
    ///
    /// The export only works on stopped nodes; running nodes are skipped with a warning.
    pub async fn states_agree(&self, block: Option<u64>, selection: &NodeSelection) -> Result<bool> {
        let mut reference: Option<(usize, Value)> = None;
        let mut agree = true;

        for index in self.indices(selection)? {
            let node = &self[index];
            if node.is_running() {
                warn!("node {}: running, not comparing its state", index);
                continue;
            }

            let state = node.export_state(block).await?;
            match &reference {
                None => reference = Some((index, state)),
                Some((first, expected)) if *expected != state => {
                    error!(
                        "node {}: state at {:?} differs from node {}",
                        index, block, first
                    );
                    agree = false;
                }
                Some(_) => {}
            }
        }

        Ok(agree)
    }
}
