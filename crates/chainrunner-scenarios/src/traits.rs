use anyhow::Result;

use crate::config::Config;

pub trait Scenario {
    async fn run(&self, config: &Config) -> Result<()>;
}
