//! Waiting for the chain to make progress, bounded by a deadline set when the wait begins.

use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::async_helpers::poll_until;
use crate::chain::{Chain, NodeSelection};
use crate::error::ChainError;

/// Parameters of [`Chain::wait_for_finalization`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationWait {
    pub nodes: NodeSelection,
    pub timeout: Duration,
    /// Finalization has to pass `old_finalized + finalized_delta`.
    pub finalized_delta: i64,
    /// After finalization moved, wait until every node's `best - finalized` is at most this.
    /// `None` skips that phase.
    pub catchup_delta: Option<i64>,
}

impl Default for FinalizationWait {
    fn default() -> Self {
        Self {
            nodes: NodeSelection::All,
            timeout: Duration::from_secs(600),
            finalized_delta: 3,
            catchup_delta: Some(10),
        }
    }
}

impl FinalizationWait {
    pub fn nodes(mut self, nodes: impl Into<NodeSelection>) -> Self {
        self.nodes = nodes.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn finalized_delta(mut self, delta: i64) -> Self {
        self.finalized_delta = delta;
        self
    }

    pub fn catchup(mut self, delta: i64) -> Self {
        self.catchup_delta = Some(delta);
        self
    }

    pub fn no_catchup(mut self) -> Self {
        self.catchup_delta = None;
        self
    }
}

impl Chain {
    /// Waits until every selected node finalized past `old_finalized + finalized_delta`.
    ///
    /// Fails with [`ChainError::Timeout`] if that does not happen in time. When catch-up is
    /// requested it then waits, until the same deadline, for every node's imported height to
    /// come within `catchup_delta` of its finalized height; running out of time there is only
    /// logged.
    pub async fn wait_for_finalization(
        &self,
        old_finalized: i64,
        wait: &FinalizationWait,
    ) -> Result<()> {
        // Reject bad indices before spending any time polling.
        self.indices(&wait.nodes)?;

        let deadline = Instant::now() + wait.timeout;
        let target = old_finalized + wait.finalized_delta;
        let chain = self;
        let nodes = &wait.nodes;

        info!(
            "chain {}: waiting for finalization past #{}",
            self.path().display(),
            target
        );
        let finalized = poll_until(deadline, self.poll_interval(), move || async move {
            let finalized = chain.get_highest_finalized(nodes).await?;
            debug!("finalized #{}, waiting for more than #{}", finalized, target);
            anyhow::Ok(finalized > target)
        })
        .await?;

        if !finalized {
            return Err(ChainError::Timeout {
                condition: format!("finalization stalled at or below #{}", target),
                timeout: wait.timeout,
            }
            .into());
        }

        let Some(catchup_delta) = wait.catchup_delta else {
            return Ok(());
        };

        let caught_up = poll_until(deadline, self.poll_interval(), move || async move {
            let heights = chain.heights(nodes).await?;
            debug!(
                "waiting for catch-up within {}: {}",
                catchup_delta,
                heights
                    .iter()
                    .map(|h| h.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            anyhow::Ok(heights.iter().all(|h| h.gap() <= catchup_delta))
        })
        .await?;

        if !caught_up {
            warn!(
                "chain {}: finalization resumed, but nodes did not catch up within {} blocks in {:?}",
                self.path().display(),
                catchup_delta,
                wait.timeout
            );
        }

        Ok(())
    }

    /// Waits until every selected node imported a block at `height` or above.
    pub async fn wait_for_imported_at_height(
        &self,
        height: i64,
        nodes: &NodeSelection,
        timeout: Duration,
    ) -> Result<()> {
        self.indices(nodes)?;

        let deadline = Instant::now() + timeout;
        let chain = self;

        info!(
            "chain {}: waiting for imported height #{}",
            self.path().display(),
            height
        );
        let reached = poll_until(deadline, self.poll_interval(), move || async move {
            let imported = chain.get_highest_imported(nodes).await?;
            debug!("imported #{}, waiting for #{}", imported, height);
            anyhow::Ok(imported >= height)
        })
        .await?;

        if !reached {
            return Err(ChainError::Timeout {
                condition: format!("nodes did not import block #{}", height),
                timeout,
            }
            .into());
        }
        Ok(())
    }

    /// Waits until every selected node knows all authorities of its session. Only validators
    /// report this, so `None` selects the validators.
    pub async fn wait_for_authorities(
        &self,
        nodes: Option<&NodeSelection>,
        timeout: Duration,
    ) -> Result<()> {
        let indices = self.indices(nodes.unwrap_or(&NodeSelection::Validators))?;

        let deadline = Instant::now() + timeout;
        let indices = &indices;
        let chain = self;

        info!(
            "chain {}: waiting for authorities on nodes {:?}",
            self.path().display(),
            indices
        );
        let connected = poll_until(deadline, self.poll_interval(), move || async move {
            for &index in indices {
                if !chain[index].check_authorities().await? {
                    debug!("node {} does not know all authorities yet", index);
                    return Ok(false);
                }
            }
            anyhow::Ok(true)
        })
        .await?;

        if !connected {
            return Err(ChainError::Timeout {
                condition: "not all authorities are known".to_string(),
                timeout,
            }
            .into());
        }
        Ok(())
    }
}
