use std::time::Duration;

use anyhow::{Context, Result};
use chainrunner::{Chain, FinalizationWait, Flags, NodeSelection, Seq};
use log::info;

use crate::config::{accounts, Config};
use crate::traits::Scenario;

/// How far each half runs ahead on its own. Also the cap on unfinalized blocks, so a half has to
/// stop producing before it can fork off too far.
const BLOCKS_PER_STAGE: i64 = 50;

const STAGE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub struct ForceReorg {}

impl ForceReorg {
    pub fn new() -> Self {
        Self {}
    }
}

impl Scenario for ForceReorg {
    async fn run(&self, config: &Config) -> Result<()> {
        let binary = config.binary();
        let (_, accounts) = accounts(&binary, 8).await?;
        let no_accounts: &[String] = &[];

        info!("Bootstrapping the chain");
        let mut chain = Chain::bootstrap(
            &config.workdir,
            &binary,
            &accounts[..],
            no_accounts,
            false,
            &Flags::new()
                .set("sudo_account_id", accounts[0].as_str())
                .set("chain_type", "local"),
        )
        .await?;

        chain.set_flags(
            &Flags::new()
                .marker("no_mdns")
                .set("port", Seq(30334))
                .set("validator_port", Seq(30343))
                .set("rpc_port", Seq(9944))
                .set("unit_creation_delay", 200u64)
                .set("execution", "Native"),
        );

        let mut addresses = Vec::new();
        let mut validator_addresses = Vec::new();
        for node in &chain {
            addresses.push(
                node.address(None)
                    .await?
                    .with_context(|| format!("Node {} has no p2p port", node.index()))?,
            );
            validator_addresses.push(
                node.validator_address(None)
                    .with_context(|| format!("Node {} has no validator port", node.index()))?,
            );
        }
        chain.set_flags(&Flags::new().set("bootnodes", addresses[1].as_str()));
        chain.set_flags_validator(
            &Flags::new()
                .set("public_addr", addresses)
                .set("public_validator_addresses", validator_addresses)
                .marker("validator"),
        );
        chain.set_flags(&Flags::new().set("max_nonfinalized_blocks", BLOCKS_PER_STAGE));

        info!("Starting the chain");
        chain.start("aleph", &NodeSelection::All, false).await?;

        let part1 = NodeSelection::only([0, 2, 4, 6]);
        let part2 = NodeSelection::only([1, 3, 5, 7]);
        let catch_up = FinalizationWait::default().catchup(5);

        chain
            .wait_for_finalization(BLOCKS_PER_STAGE, &catch_up)
            .await?;

        info!("Stopping nodes {:?}", part2);
        chain.stop(&part2)?;
        let f1 = chain.get_highest_finalized(&part1).await?;
        chain
            .wait_for_imported_at_height(f1 + BLOCKS_PER_STAGE, &part1, STAGE_TIMEOUT)
            .await?;

        info!("Stopping nodes {:?}", part1);
        chain.stop(&part1)?;

        let f2 = chain.get_highest_finalized(&part2).await?;
        info!("Starting nodes {:?}", part2);
        chain.start("aleph-recovered", &part2, false).await?;
        chain
            .wait_for_imported_at_height(f2 + BLOCKS_PER_STAGE, &part2, STAGE_TIMEOUT)
            .await?;

        info!("Starting nodes {:?}", part1);
        chain.start("aleph-recovered", &part1, false).await?;
        chain.wait_for_finalization(0, &catch_up).await?;

        chain.stop(&NodeSelection::All)?;
        info!("Both halves agreed on one fork");
        Ok(())
    }
}
