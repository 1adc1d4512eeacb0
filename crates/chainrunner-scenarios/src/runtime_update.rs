use std::time::Duration;

use anyhow::{bail, Result};
use chainrunner::{Chain, Flags, NodeSelection, Seq};
use log::{info, warn};

use crate::config::{accounts, Config};
use crate::traits::Scenario;

const SETTLE: Duration = Duration::from_secs(60);
const UPGRADE_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct RuntimeUpdate {}

impl RuntimeUpdate {
    pub fn new() -> Self {
        Self {}
    }
}

async fn report(chain: &Chain) -> Result<()> {
    chain.check_finalized(&NodeSelection::All).await?;
    chain.check_version(&NodeSelection::All).await?;
    Ok(())
}

impl Scenario for RuntimeUpdate {
    async fn run(&self, config: &Config) -> Result<()> {
        let old_binary = config.binary();
        let new_binary = config.require(&config.new_binary, "new-binary")?;
        let runtime = config.require(&config.runtime, "runtime")?;
        let send_runtime = config.require(&config.send_runtime, "send-runtime")?;

        let (phrases, accounts) = accounts(new_binary, 4).await?;
        let no_accounts: &[String] = &[];

        info!("Bootstrapping the chain with the old binary");
        let mut chain = Chain::bootstrap(
            &config.workdir,
            &old_binary,
            &accounts[..],
            no_accounts,
            false,
            &Flags::new()
                .set("sudo_account_id", accounts[0].as_str())
                .set("chain_type", "local")
                .set("millisecs_per_block", 2000u64)
                .set("session_period", 40u64),
        )
        .await?;
        chain.set_flags(
            &Flags::new()
                .marker("validator")
                .set("port", Seq(30334))
                .set("ws_port", Seq(9944))
                .set("rpc_port", Seq(9933))
                .set("unit_creation_delay", 200u64)
                .set("execution", "Native"),
        );

        info!("Starting the chain with the old binary");
        chain.start("old", &NodeSelection::All, false).await?;
        tokio::time::sleep(SETTLE).await;
        report(&chain).await?;

        let last = NodeSelection::only([3]);
        info!("Killing node 3 and deleting its database");
        chain.stop(&last)?;
        chain.purge(&last).await?;

        info!("Restarting node 3 with the new binary");
        chain.set_binary(new_binary, &last)?;
        chain.start("new", &last, false).await?;
        tokio::time::sleep(SETTLE).await;
        report(&chain).await?;

        info!("Submitting the new runtime");
        chain
            .update_runtime(send_runtime, &phrases[0], runtime)
            .await?;
        tokio::time::sleep(UPGRADE_DELAY).await;
        report(&chain).await?;

        info!("Restarting the remaining nodes with the new binary");
        let rest = NodeSelection::only([0, 1, 2]);
        chain.stop(&rest)?;
        chain.set_binary(new_binary, &rest)?;
        chain.start("new", &rest, false).await?;
        tokio::time::sleep(SETTLE).await;
        report(&chain).await?;

        info!("Stopping the chain");
        chain.stop(&NodeSelection::All)?;

        let finalized = chain.get_highest_finalized(&NodeSelection::All).await?;
        if finalized < 0 {
            warn!("No node reported a finalized block, comparing best states instead");
        }
        let block = u64::try_from(finalized).ok();
        info!("Comparing exported states at {:?}", block);
        if !chain.states_agree(block, &NodeSelection::All).await? {
            bail!("Nodes exported different states after the update");
        }

        info!("All nodes agree on the state after the update");
        Ok(())
    }
}
