//! The set of nodes making up one local chain, and the operations that fan out over it.

use std::fs;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::process::Command;

use crate::error::ChainError;
use crate::flags::Flags;
use crate::log_scan::BlockHeights;
use crate::node::{Node, Role};
use crate::process::{check_file, run_checked};

pub const CHAINSPEC_FILE: &str = "chainspec.json";

/// Delay between two checks of a waiting condition.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which nodes an operation applies to. Indices address the chain's node list, validators
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NodeSelection {
    #[default]
    All,
    Validators,
    NonValidators,
    /// Exactly these nodes, in this order. An empty list selects no node at all.
    Only(Vec<usize>),
}

impl NodeSelection {
    pub fn only(indices: impl IntoIterator<Item = usize>) -> Self {
        NodeSelection::Only(indices.into_iter().collect())
    }
}

impl From<Vec<usize>> for NodeSelection {
    fn from(indices: Vec<usize>) -> Self {
        NodeSelection::Only(indices)
    }
}

impl From<&[usize]> for NodeSelection {
    fn from(indices: &[usize]) -> Self {
        NodeSelection::Only(indices.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for NodeSelection {
    fn from(indices: [usize; N]) -> Self {
        NodeSelection::Only(indices.to_vec())
    }
}

/// A local chain: a working directory with the chainspec and one subdirectory per node.
///
/// Nodes are created once, validators first, and are never added or removed afterwards.
#[derive(Debug)]
pub struct Chain {
    path: PathBuf,
    chainspec: PathBuf,
    nodes: Vec<Node>,
    validator_count: usize,
    poll_interval: Duration,
}

impl Chain {
    /// Creates the node objects without running anything. The working directory is created if
    /// it does not exist yet.
    pub fn new<S: AsRef<str>>(
        workdir: impl AsRef<Path>,
        binary: impl AsRef<Path>,
        validators: &[S],
        nonvalidators: &[S],
    ) -> Result<Self> {
        let workdir = workdir.as_ref();
        fs::create_dir_all(workdir)
            .with_context(|| format!("Creating working directory {}", workdir.display()))?;
        let path = fs::canonicalize(workdir)
            .with_context(|| format!("Resolving working directory {}", workdir.display()))?;
        let chainspec = path.join(CHAINSPEC_FILE);
        let binary = binary.as_ref();

        let accounts = validators
            .iter()
            .map(|a| (a.as_ref(), Role::Validator))
            .chain(nonvalidators.iter().map(|a| (a.as_ref(), Role::NonValidator)));
        let nodes: Vec<Node> = accounts
            .enumerate()
            .map(|(index, (account, role))| {
                Node::new(
                    index,
                    account,
                    role,
                    binary,
                    &chainspec,
                    path.join(account),
                    &path,
                )
            })
            .collect();

        Ok(Self {
            path,
            chainspec,
            nodes,
            validator_count: validators.len(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Generates the chainspec with the binary's `bootstrap-chain` subcommand and the key
    /// material of every non-validator with `bootstrap-node`.
    ///
    /// `chain_params` are passed to `bootstrap-chain` as extra flags, resolved as for a single
    /// node (`sudo_account_id`, `chain_type`, ...).
    pub async fn bootstrap<S: AsRef<str>>(
        workdir: impl AsRef<Path>,
        binary: impl AsRef<Path>,
        validators: &[S],
        nonvalidators: &[S],
        raw: bool,
        chain_params: &Flags,
    ) -> Result<Self> {
        let binary = check_file(binary.as_ref())?;
        let chain = Self::new(workdir, &binary, validators, nonvalidators)?;

        let account_ids = validators
            .iter()
            .map(|a| a.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        let mut command = Command::new(&binary);
        command
            .arg("bootstrap-chain")
            .arg("--base-path")
            .arg(&chain.path)
            .arg("--account-ids")
            .arg(account_ids);
        if raw {
            command.arg("--raw");
        }
        command.args(chain_params.resolve(0).to_args());
        let output = run_checked(&mut command)
            .await
            .context("Bootstrapping the chain")?;
        tokio::fs::write(&chain.chainspec, &output.stdout)
            .await
            .with_context(|| format!("Writing {}", chain.chainspec.display()))?;

        for node in chain.nonvalidator_nodes() {
            let mut command = Command::new(&binary);
            command
                .arg("bootstrap-node")
                .arg("--base-path")
                .arg(node.base_path())
                .arg("--account-id")
                .arg(node.account());
            run_checked(&mut command)
                .await
                .with_context(|| format!("Bootstrapping non-validator node {}", node.index()))?;
        }

        info!(
            "chain {}: bootstrapped {} validators and {} non-validators",
            chain.path.display(),
            chain.validator_count,
            chain.nodes.len() - chain.validator_count
        );

        Ok(chain)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chainspec(&self) -> &Path {
        &self.chainspec
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn validator_nodes(&self) -> &[Node] {
        &self.nodes[..self.validator_count]
    }

    pub fn nonvalidator_nodes(&self) -> &[Node] {
        &self.nodes[self.validator_count..]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    pub fn node(&self, index: usize) -> Result<&Node> {
        let len = self.nodes.len();
        self.nodes
            .get(index)
            .ok_or_else(|| ChainError::NoSuchNode { index, len }.into())
    }

    pub fn node_mut(&mut self, index: usize) -> Result<&mut Node> {
        let len = self.nodes.len();
        self.nodes
            .get_mut(index)
            .ok_or_else(|| ChainError::NoSuchNode { index, len }.into())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Resolves a selection to node indices, rejecting indices past the end.
    pub fn indices(&self, selection: &NodeSelection) -> Result<Vec<usize>> {
        let len = self.nodes.len();
        match selection {
            NodeSelection::All => Ok((0..len).collect()),
            NodeSelection::Validators => Ok((0..self.validator_count).collect()),
            NodeSelection::NonValidators => Ok((self.validator_count..len).collect()),
            NodeSelection::Only(indices) => {
                if let Some(&index) = indices.iter().find(|&&i| i >= len) {
                    return Err(ChainError::NoSuchNode { index, len }.into());
                }
                Ok(indices.clone())
            }
        }
    }

    fn apply_flags(nodes: &mut [Node], flags: &Flags) {
        for (position, node) in nodes.iter_mut().enumerate() {
            node.flags_mut().merge(flags.resolve(position));
        }
    }

    /// Sets flags on every node. Sequence and per-node rules follow the node index.
    pub fn set_flags(&mut self, flags: &Flags) {
        debug!("chain {}: flags for all nodes: {:?}", self.path.display(), flags);
        Self::apply_flags(&mut self.nodes, flags);
    }

    /// Sets flags on validators only; rules are indexed from the first validator.
    pub fn set_flags_validator(&mut self, flags: &Flags) {
        debug!("chain {}: flags for validators: {:?}", self.path.display(), flags);
        let count = self.validator_count;
        Self::apply_flags(&mut self.nodes[..count], flags);
    }

    /// Sets flags on non-validators only; rules are indexed from the first non-validator.
    pub fn set_flags_nonvalidator(&mut self, flags: &Flags) {
        debug!("chain {}: flags for non-validators: {:?}", self.path.display(), flags);
        let count = self.validator_count;
        Self::apply_flags(&mut self.nodes[count..], flags);
    }

    /// Replaces the binary the selected nodes run from their next start on.
    pub fn set_binary(&mut self, binary: impl AsRef<Path>, selection: &NodeSelection) -> Result<()> {
        let binary = check_file(binary.as_ref())?;
        for index in self.indices(selection)? {
            self.nodes[index].set_binary(&binary);
        }
        Ok(())
    }

    /// Replaces the chainspec the selected nodes use from their next start on.
    pub fn set_chainspec(
        &mut self,
        chainspec: impl AsRef<Path>,
        selection: &NodeSelection,
    ) -> Result<()> {
        let chainspec = check_file(chainspec.as_ref())?;
        for index in self.indices(selection)? {
            self.nodes[index].set_chainspec(&chainspec);
        }
        Ok(())
    }

    /// Changes log verbosity of `target` on the selected running nodes.
    pub async fn set_log_level(
        &self,
        target: &str,
        level: &str,
        selection: &NodeSelection,
    ) -> Result<()> {
        for index in self.indices(selection)? {
            self.nodes[index].set_log_level(target, level).await?;
        }
        Ok(())
    }

    /// Starts the selected nodes in index order. Logs go to `<run_label><index>.log` in the
    /// working directory.
    pub async fn start(
        &mut self,
        run_label: &str,
        selection: &NodeSelection,
        backup: bool,
    ) -> Result<()> {
        for index in self.indices(selection)? {
            self.nodes[index].start(run_label, backup).await?;
        }
        Ok(())
    }

    /// Kills the selected nodes. Nodes that are not running are skipped.
    pub fn stop(&mut self, selection: &NodeSelection) -> Result<()> {
        for index in self.indices(selection)? {
            self.nodes[index].stop()?;
        }
        Ok(())
    }

    /// Deletes the database of the selected nodes.
    pub async fn purge(&self, selection: &NodeSelection) -> Result<()> {
        for index in self.indices(selection)? {
            self.nodes[index].purge().await?;
        }
        Ok(())
    }

    /// Log-derived heights of the selected nodes, queried in index order.
    pub async fn heights(&self, selection: &NodeSelection) -> Result<Vec<BlockHeights>> {
        let mut heights = Vec::new();
        for index in self.indices(selection)? {
            heights.push(self.nodes[index].highest_block().await?);
        }
        Ok(heights)
    }

    /// The best height every selected node has imported; `-1` when nothing is selected or a node
    /// has not reported yet.
    pub async fn get_highest_imported(&self, selection: &NodeSelection) -> Result<i64> {
        let heights = self.heights(selection).await?;
        Ok(heights.iter().map(|h| h.best).min().unwrap_or(-1))
    }

    /// The finalized height every selected node has reached; `-1` when nothing is selected or a
    /// node has not reported yet.
    pub async fn get_highest_finalized(&self, selection: &NodeSelection) -> Result<i64> {
        let heights = self.heights(selection).await?;
        Ok(heights.iter().map(|h| h.finalized).min().unwrap_or(-1))
    }
}

impl Index<usize> for Chain {
    type Output = Node;

    fn index(&self, index: usize) -> &Node {
        &self.nodes[index]
    }
}

impl IndexMut<usize> for Chain {
    fn index_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{FlagName, Seq};

    fn chain(validators: usize, nonvalidators: usize) -> (tempfile::TempDir, Chain) {
        let dir = tempfile::tempdir().unwrap();
        let validators: Vec<_> = (0..validators).map(|i| format!("validator{}", i)).collect();
        let nonvalidators: Vec<_> = (0..nonvalidators).map(|i| format!("observer{}", i)).collect();
        let chain = Chain::new(dir.path(), "/nonexistent/node", &validators, &nonvalidators).unwrap();
        (dir, chain)
    }

    #[test]
    fn test_new_orders_validators_first() {
        let (_dir, chain) = chain(4, 2);
        assert_eq!(chain.len(), 6);
        assert_eq!(
            chain.len(),
            chain.validator_nodes().len() + chain.nonvalidator_nodes().len()
        );
        for (i, node) in chain.iter().enumerate() {
            assert_eq!(node.index(), i);
            let expected = if i < 4 { Role::Validator } else { Role::NonValidator };
            assert_eq!(node.role(), expected);
            assert_eq!(node.base_path(), chain.path().join(node.account()));
            assert_eq!(node.chainspec(), chain.chainspec());
        }
        assert_eq!(chain[4].account(), "observer0");
        assert!(!chain.chainspec().exists());
    }

    #[test]
    fn test_selection_indices() {
        let (_dir, chain) = chain(3, 2);
        assert_eq!(chain.indices(&NodeSelection::All).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(chain.indices(&NodeSelection::Validators).unwrap(), vec![0, 1, 2]);
        assert_eq!(chain.indices(&NodeSelection::NonValidators).unwrap(), vec![3, 4]);
        assert_eq!(chain.indices(&NodeSelection::only([4, 1])).unwrap(), vec![4, 1]);
        assert!(chain.indices(&NodeSelection::only([])).unwrap().is_empty());

        let err = chain.indices(&NodeSelection::from(vec![1, 5])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::NoSuchNode { index: 5, len: 5 })
        ));
    }

    #[test]
    fn test_flags_follow_subset_positions() {
        let (_dir, mut chain) = chain(2, 2);
        chain.set_flags(&Flags::new().set("port", Seq(30334)).marker("no_mdns"));
        chain.set_flags_validator(&Flags::new().marker("validator"));
        chain.set_flags_nonvalidator(&Flags::new().set("rpc_port", Seq(9933)));

        let ports: Vec<_> = chain
            .iter()
            .map(|n| n.flags().value(&FlagName::Port).unwrap().to_string())
            .collect();
        assert_eq!(ports, vec!["30334", "30335", "30336", "30337"]);

        assert!(chain[1].flags().contains(&FlagName::Validator));
        assert!(!chain[2].flags().contains(&FlagName::Validator));
        assert!(!chain[0].flags().contains(&FlagName::RpcPort));
        assert_eq!(chain[2].rpc_port().unwrap(), 9933);
        assert_eq!(chain[3].rpc_port().unwrap(), 9934);
        assert!(chain.iter().all(|n| n.flags().contains(&FlagName::NoMdns)));
    }

    #[test]
    fn test_set_binary_requires_existing_file() {
        let (dir, mut chain) = chain(2, 0);
        let err = chain
            .set_binary(dir.path().join("missing"), &NodeSelection::All)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::FileNotFound(_))
        ));

        let new_binary = dir.path().join("node-new");
        std::fs::write(&new_binary, b"").unwrap();
        chain.set_binary(&new_binary, &NodeSelection::only([1])).unwrap();
        assert_eq!(chain[0].binary(), Path::new("/nonexistent/node"));
        assert_eq!(chain[1].binary(), new_binary);
    }

    #[tokio::test]
    async fn test_heights_without_logs() {
        let (_dir, chain) = chain(3, 1);
        assert_eq!(chain.get_highest_finalized(&NodeSelection::All).await.unwrap(), -1);
        assert_eq!(chain.get_highest_imported(&NodeSelection::All).await.unwrap(), -1);
        assert_eq!(
            chain.get_highest_finalized(&NodeSelection::only([])).await.unwrap(),
            -1
        );
    }
}
