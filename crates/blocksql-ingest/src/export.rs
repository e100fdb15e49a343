//! Export passes: copy every confirmed block the store lacks
//!
//! A pass reads the stored height, picks the highest redundant node, subtracts
//! the confirmation lag and runs the missing heights through a fetch stage and
//! a single-worker store stage joined by the ordering reassembler.

use crate::adapter::{AdapterError, LedgerAdapter};
use crate::config::ExportConfig;
use crate::model::LedgerBlock;
use crate::nodes::select_node;
use crate::pipeline::{
    connect, PipelineRunner, PipelineStage, ProgressEstimator, RunOutcome, StageControl,
};
use crate::store::{BlockSink, StoreError};
use blocksql_common::{Asset, BlocksqlError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Steps between progress log lines
const PROGRESS_INTERVAL: u64 = 10;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no configured node answered")]
    NoReachableNode,

    #[error("at least one node is required")]
    NoNodes,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] BlocksqlError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The confirmed node height is not ahead of the store
    UpToDate { db_height: u64, node_height: u64 },
    /// Heights `from..=to` went through the pipeline
    Synced { from: u64, to: u64, outcome: RunOutcome },
}

impl PassOutcome {
    pub fn success(&self) -> bool {
        match self {
            Self::UpToDate { .. } => true,
            Self::Synced { outcome, .. } => outcome.success,
        }
    }

    pub fn interrupted(&self) -> bool {
        matches!(self, Self::Synced { outcome, .. } if outcome.interrupted)
    }
}

pub struct Exporter<A, S> {
    asset: Asset,
    nodes: Vec<Arc<A>>,
    sink: Arc<S>,
    config: ExportConfig,
    cancel: CancellationToken,
}

impl<A, S> Exporter<A, S>
where
    A: LedgerAdapter + 'static,
    S: BlockSink<A::Block> + 'static,
{
    pub fn new(asset: Asset, nodes: Vec<A>, sink: S, config: ExportConfig) -> Result<Self> {
        config.validate()?;
        if nodes.is_empty() {
            return Err(ExportError::NoNodes);
        }
        Ok(Self {
            asset,
            nodes: nodes.into_iter().map(Arc::new).collect(),
            sink: Arc::new(sink),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that interrupts the current pass and ends loop mode
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one pass
    #[instrument(skip(self), fields(asset = %self.asset))]
    pub async fn pass(&self) -> Result<PassOutcome> {
        let db_height = self.sink.stored_height().await?.unwrap_or(0);
        let selected = select_node(&self.nodes)
            .await
            .ok_or(ExportError::NoReachableNode)?;
        let node_height = selected
            .height
            .saturating_sub(self.asset.block_lag(self.config.lag_secs));

        info!(db_height, node_height, "Heights before pass");
        if node_height <= db_height {
            info!(db_height, node_height, "Store is up to date");
            return Ok(PassOutcome::UpToDate {
                db_height,
                node_height,
            });
        }

        let from = db_height + 1;
        let heights: Vec<u64> = (from..=node_height).collect();
        let outcome = self
            .run_heights(self.nodes[selected.index].clone(), heights)
            .await;

        if outcome.success {
            info!(from, to = node_height, completed = outcome.completed, "Pass finished");
        } else {
            warn!(
                from,
                to = node_height,
                completed = outcome.completed,
                interrupted = outcome.interrupted,
                "Pass ended early"
            );
        }
        Ok(PassOutcome::Synced {
            from,
            to: node_height,
            outcome,
        })
    }

    async fn run_heights(&self, node: Arc<A>, heights: Vec<u64>) -> RunOutcome {
        let total = heights.len() as u64;

        let fetch = Arc::new(PipelineStage::new("fetch", self.config.rpc_threads, {
            move |height: u64| {
                let node = node.clone();
                async move { node.get_block_at(height).await.map_err(anyhow::Error::from) }
            }
        }));
        let store = Arc::new(PipelineStage::new("store", 1, {
            let sink = self.sink.clone();
            move |block: A::Block| {
                let sink = sink.clone();
                async move {
                    let counts = sink.store_block(&block).await.map_err(anyhow::Error::from)?;
                    debug!(
                        height = block.height(),
                        transactions = counts.transactions,
                        outputs = counts.outputs,
                        "Stored block"
                    );
                    Ok::<_, anyhow::Error>(block.height())
                }
            }
        }));

        let (Some(fetched), Some(store_input), Some(tail)) = (
            fetch.take_completions(),
            store.handle(),
            store.take_completions(),
        ) else {
            // fresh stages always expose their channels
            return RunOutcome {
                success: false,
                completed: 0,
                interrupted: false,
                failures: Vec::new(),
            };
        };
        let connector = connect(fetched, store_input);
        let stages: Vec<Arc<dyn StageControl>> = vec![fetch.clone() as Arc<dyn StageControl>, store.clone()];

        let estimator = ProgressEstimator::new(
            format!("{} export", self.asset),
            total,
            self.asset.blocks_per_week() as usize,
            PROGRESS_INTERVAL,
        );
        let outcome = PipelineRunner::new(heights)
            .credit_window(self.config.credit_window)
            .estimator(estimator)
            .describe_with(|height| format!("height {height}"))
            .cancellation(self.cancel.clone())
            .run(fetch.as_ref(), &stages, tail)
            .await;

        match connector.await {
            Ok(stats) if stats.stranded > 0 => {
                debug!(stranded = stats.stranded, "Fetched blocks left behind a gap");
            },
            Ok(_) => {},
            Err(e) => error!(error = %e, "Reassembler ended abnormally"),
        }
        outcome
    }

    /// Repeat passes until cancelled. Failed passes are logged and retried
    /// after the configured pause. Returns the number of passes run.
    pub async fn run_loop(&self) -> usize {
        let mut passes = 0;
        loop {
            passes += 1;
            match self.pass().await {
                Ok(outcome) if outcome.interrupted() => {
                    info!(asset = %self.asset, "Export interrupted");
                    break;
                },
                Ok(_) => {},
                Err(e) => error!(asset = %self.asset, error = %e, "Export pass failed"),
            }

            info!(
                asset = %self.asset,
                seconds = self.config.loop_sleep_secs,
                "Sleeping before next pass"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(asset = %self.asset, "Export loop stopped");
                    break;
                },
                _ = tokio::time::sleep(self.config.loop_sleep()) => {},
            }
        }
        passes
    }
}
