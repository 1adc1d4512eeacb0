use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScenarioName {
    /// Kill and restart a validator and a non-validator several times
    MultipleRestarts,
    /// Run two halves of the validators alternately until their forks have to be reorganised
    ForceReorg,
    /// Move the chain to a new binary and a new runtime while it runs
    RuntimeUpdate,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Which scenario to run
    #[arg(value_enum)]
    pub scenario: ScenarioName,

    /// Working directory for the chainspec, the logs and the node databases
    #[arg(long, env = "WORKDIR", default_value = "/tmp/workdir")]
    pub workdir: PathBuf,

    /// Node binary; defaults to `<workdir>/aleph-node`
    #[arg(long, env = "NODE_BINARY")]
    pub binary: Option<PathBuf>,

    /// Node binary the runtime update moves to
    #[arg(long, env = "NEW_NODE_BINARY")]
    pub new_binary: Option<PathBuf>,

    /// Compiled runtime submitted by the runtime update
    #[arg(long, env = "RUNTIME")]
    pub runtime: Option<PathBuf>,

    /// Tool that submits a runtime upgrade through a node's RPC port
    #[arg(long, env = "SEND_RUNTIME")]
    pub send_runtime: Option<PathBuf>,
}

impl Config {
    pub fn binary(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| self.workdir.join("aleph-node"))
    }

    /// An optional path some scenario cannot do without.
    pub fn require<'a>(&self, path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
        match path {
            Some(path) => Ok(path),
            None => bail!("the {:?} scenario needs --{}", self.scenario, what),
        }
    }
}

/// `//0`, `//1`, ... seed phrases and the account ids the binary derives from them.
pub async fn accounts(binary: &Path, count: usize) -> Result<(Vec<String>, Vec<String>)> {
    let phrases: Vec<String> = (0..count).map(|i| format!("//{}", i)).collect();
    let keys = chainrunner::generate_keys(binary, &phrases).await?;

    let mut accounts = Vec::with_capacity(count);
    for (phrase, account) in keys {
        let account = account.with_context(|| format!("No account derived from `{}`", phrase))?;
        info!("{} -> {}", phrase, account);
        accounts.push(account);
    }
    Ok((phrases, accounts))
}
