use std::time::Duration;

use anyhow::{bail, Context, Result};
use chainrunner::{Chain, Flags, NodeSelection, Seq};
use log::info;

use crate::config::{accounts, Config};
use crate::traits::Scenario;

/// Blocks the restarted nodes have to finalize after coming back.
const ALLOWED_DELTA: i64 = 5;

/// (run, stop, catch-up) durations of each round, in seconds.
const ROUNDS: [(u64, u64, u64); 3] = [(150, 20, 30), (20, 15, 30), (20, 15, 30)];

#[derive(Debug)]
pub struct MultipleRestarts {}

impl MultipleRestarts {
    pub fn new() -> Self {
        Self {}
    }
}

impl Scenario for MultipleRestarts {
    async fn run(&self, config: &Config) -> Result<()> {
        let binary = config.binary();
        let (_, accounts) = accounts(&binary, 6).await?;

        info!("Bootstrapping the chain");
        let mut chain = Chain::bootstrap(
            &config.workdir,
            &binary,
            &accounts[..4],
            &accounts[4..],
            false,
            &Flags::new()
                .set("sudo_account_id", accounts[0].as_str())
                .set("chain_type", "local"),
        )
        .await?;

        chain.set_flags(
            &Flags::new()
                .set("port", Seq(30334))
                .set("ws_port", Seq(9944))
                .set("rpc_port", Seq(9933))
                .set("unit_creation_delay", 200u64)
                .set("execution", "Native")
                .set("pruning", "archive"),
        );
        let mut addresses = Vec::new();
        for node in &chain {
            let address = node
                .address(None)
                .await?
                .with_context(|| format!("Node {} has no p2p port", node.index()))?;
            addresses.push(address);
        }
        chain.set_flags(
            &Flags::new()
                .set("bootnodes", addresses[0].as_str())
                .set("public_addr", addresses),
        );
        chain.set_flags_validator(&Flags::new().marker("validator"));

        info!("Starting the chain");
        chain.start("aleph", &NodeSelection::All, false).await?;

        let killed = NodeSelection::only([3, 4]);
        for (run, stop, catch_up) in ROUNDS {
            info!("Waiting {}s", run);
            tokio::time::sleep(Duration::from_secs(run)).await;
            let before_kill = chain.check_finalized(&NodeSelection::All).await?;

            info!("Killing one validator and one non-validator");
            chain.stop(&killed)?;
            info!("Waiting {}s", stop);
            tokio::time::sleep(Duration::from_secs(stop)).await;
            let before_start = chain.check_finalized(&NodeSelection::All).await?;

            // A quarter of the validators is down; allow 10% on top of the reduced rate.
            let expected = stop as f64 * 0.75 * 0.9;
            if ((before_start[0] - before_kill[0]) as f64) < expected {
                bail!(
                    "Finalization stalled: node 0 went from #{} to #{} in {}s",
                    before_kill[0],
                    before_start[0],
                    stop
                );
            }

            info!("Restarting nodes");
            chain.start("aleph", &killed, false).await?;
            info!("Waiting {}s for catch up", catch_up);
            tokio::time::sleep(Duration::from_secs(catch_up)).await;
            let after_catch_up = chain.check_finalized(&NodeSelection::All).await?;

            for (index, kind) in [(3, "validator"), (4, "non-validator")] {
                let diff = after_catch_up[index] - before_start[index];
                if diff <= ALLOWED_DELTA {
                    bail!("Too small catch up for the {}: {} blocks", kind, diff);
                }
            }
        }

        chain.stop(&NodeSelection::All)?;
        info!("Nodes kept finalizing across all restarts");
        Ok(())
    }
}
