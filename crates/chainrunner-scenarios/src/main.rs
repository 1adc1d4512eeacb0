use anyhow::Result;
use clap::Parser;
use log::info;

use crate::config::{Config, ScenarioName};
use crate::force_reorg::ForceReorg;
use crate::multiple_restarts::MultipleRestarts;
use crate::runtime_update::RuntimeUpdate;
use crate::traits::Scenario;

mod config;
mod force_reorg;
mod multiple_restarts;
mod runtime_update;
mod traits;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let config = Config::parse();
    info!(
        "Running {:?} in {}",
        config.scenario,
        config.workdir.display()
    );

    match config.scenario {
        ScenarioName::MultipleRestarts => MultipleRestarts::new().run(&config).await,
        ScenarioName::ForceReorg => ForceReorg::new().run(&config).await,
        ScenarioName::RuntimeUpdate => RuntimeUpdate::new().run(&config).await,
    }
}
