//! Command-line interface of the `blocksql` binary
//!
//! - `export`: copy confirmed blocks from redundant nodes into PostgreSQL
//! - `metrics`: compute and persist daily statistics from stored blocks
//! - `schema`: create, index, vacuum or drop an asset's tables

use crate::adapter::{BitcoinFamily, ExclusionTable, LedgerAdapter, OmniAdapter};
use crate::config::{create_pool, DbConfig, ExportConfig, DEFAULT_LAG_SECS, DEFAULT_RPC_THREADS};
use crate::export::{Exporter, PassOutcome};
use crate::metrics::{MetricEngine, MetricError, PgLedgerQuery, PgMetricStore, RunSummary};
use crate::rpc::RpcEndpoint;
use crate::store::{BlockSink, OmniStore, PgStore, Schema, SchemaOp};
use anyhow::{bail, Context};
use blocksql_common::Asset;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// First day considered by the metric engine unless told otherwise
pub const DEFAULT_START_DATE: &str = "2009-01-01";

/// blocksql - blockchain ledgers as SQL tables
#[derive(Parser, Debug)]
#[command(name = "blocksql")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export confirmed blocks into the canonical tables
    Export {
        /// Asset to export (btc, ltc, zec, omni, ...)
        asset: Asset,

        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        db: String,

        /// Node as host:port:user:password, repeat for redundancy
        #[arg(long = "node", required = true, num_args = 1..)]
        nodes: Vec<RpcEndpoint>,

        /// Concurrent block fetches
        #[arg(long, default_value_t = DEFAULT_RPC_THREADS)]
        rpcthreads: usize,

        /// Blocks younger than this many seconds are left for later
        #[arg(long, default_value_t = DEFAULT_LAG_SECS)]
        lag_secs: u64,

        /// Keep exporting, pausing between passes
        #[arg(long = "loop")]
        looping: bool,

        /// TOML file replacing the built-in excluded transactions
        #[arg(long)]
        exclusions: Option<PathBuf>,
    },

    /// Compute daily metrics from stored blocks
    Metrics {
        /// Assets to compute metrics for
        #[arg(required = true, num_args = 1..)]
        assets: Vec<Asset>,

        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        db: String,

        /// First day to compute
        #[arg(long, default_value = DEFAULT_START_DATE)]
        startdate: NaiveDate,

        /// Last day to compute (defaults to the last complete day)
        #[arg(long)]
        enddate: Option<NaiveDate>,

        /// Persist computed values
        #[arg(long)]
        save: bool,

        /// Recompute days that already have a value
        #[arg(long)]
        force: bool,

        /// Drop the selected metric tables
        #[arg(long)]
        drop: bool,

        /// List the known metrics and exit
        #[arg(long)]
        list: bool,

        /// Metrics to compute (defaults to the default group)
        #[arg(long, num_args = 1..)]
        metrics: Vec<String>,

        /// Metrics to leave out
        #[arg(long, num_args = 1..)]
        excludemetrics: Vec<String>,

        /// Keep computing, pausing between runs
        #[arg(long = "loop")]
        looping: bool,
    },

    /// Maintain an asset's tables
    Schema {
        /// Asset whose tables are affected
        asset: Asset,

        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        db: String,

        #[command(flatten)]
        action: SchemaAction,
    },
}

#[derive(Args, Debug, Clone, Copy)]
#[group(required = true, multiple = false)]
pub struct SchemaAction {
    /// Create the tables if missing
    #[arg(long)]
    pub create: bool,

    /// Drop every table of the asset
    #[arg(long)]
    pub drop: bool,

    /// Add the time indexes
    #[arg(long)]
    pub add_index: bool,

    /// Drop the time indexes
    #[arg(long)]
    pub drop_index: bool,

    /// VACUUM ANALYZE the outputs table
    #[arg(long)]
    pub vacuum: bool,
}

impl SchemaAction {
    pub fn op(self) -> SchemaOp {
        if self.create {
            SchemaOp::Create
        } else if self.drop {
            SchemaOp::Drop
        } else if self.add_index {
            SchemaOp::AddIndexes
        } else if self.drop_index {
            SchemaOp::DropIndexes
        } else {
            SchemaOp::Vacuum
        }
    }
}

/// Dispatch a parsed command line
pub async fn execute(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    match cli.command {
        Commands::Export {
            asset,
            db,
            nodes,
            rpcthreads,
            lag_secs,
            looping,
            exclusions,
        } => {
            let config = ExportConfig {
                rpc_threads: rpcthreads,
                lag_secs,
                ..ExportConfig::default()
            };
            let pool = connect_db(&db).await?;
            run_export(asset, pool, nodes, config, exclusions, looping, cancel).await
        },
        Commands::Metrics {
            assets,
            db,
            startdate,
            enddate,
            save,
            force,
            drop,
            list,
            metrics,
            excludemetrics,
            looping,
        } => {
            if list {
                for def in crate::metrics::REGISTRY.iter() {
                    println!("{:<20} {:?}", def.name, def.group);
                }
                return Ok(());
            }
            let pool = connect_db(&db).await?;
            let request = MetricRequest {
                start: startdate,
                end: enddate,
                save,
                force,
                metrics,
                excluded: excludemetrics,
            };
            if drop {
                for asset in assets {
                    engine(&pool, asset, startdate)?
                        .drop_metrics(&request.metrics)
                        .await
                        .with_context(|| format!("dropping {asset} metrics"))?;
                }
                Ok(())
            } else if looping {
                metrics_loop(&pool, &assets, &request.excluded, cancel).await;
                Ok(())
            } else {
                for asset in assets {
                    run_metrics(&pool, asset, &request).await?;
                }
                Ok(())
            }
        },
        Commands::Schema { asset, db, action } => {
            let pool = connect_db(&db).await?;
            let op = action.op();
            Schema::new(asset)
                .apply(&pool, op)
                .await
                .with_context(|| format!("applying {op:?} to {asset}"))?;
            info!(%asset, ?op, "Schema operation applied");
            Ok(())
        },
    }
}

async fn connect_db(url: &str) -> anyhow::Result<PgPool> {
    create_pool(&DbConfig::from_env_with_url(url))
        .await
        .context("Failed to connect to the database")
}

async fn run_export(
    asset: Asset,
    pool: PgPool,
    endpoints: Vec<RpcEndpoint>,
    config: ExportConfig,
    exclusions: Option<PathBuf>,
    looping: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    Schema::new(asset)
        .apply(&pool, SchemaOp::Create)
        .await
        .with_context(|| format!("creating {asset} tables"))?;

    if asset == Asset::Omni {
        let nodes = endpoints
            .into_iter()
            .map(OmniAdapter::connect)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to build node clients")?;
        let store = OmniStore::new(pool).with_batch_size(config.store_batch_size);
        let exporter = Exporter::new(asset, nodes, store, config)?.cancellation(cancel);
        drive(exporter, looping).await
    } else {
        let exclusions = match exclusions {
            Some(path) => ExclusionTable::load(&path)
                .with_context(|| format!("loading exclusions from {}", path.display()))?,
            None => ExclusionTable::defaults_for(asset),
        };
        let nodes = endpoints
            .into_iter()
            .map(|endpoint| BitcoinFamily::connect(asset, endpoint, exclusions.clone()))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to build node clients")?;
        let store = PgStore::new(pool, asset).with_batch_size(config.store_batch_size);
        let exporter = Exporter::new(asset, nodes, store, config)?.cancellation(cancel);
        drive(exporter, looping).await
    }
}

async fn drive<A, S>(exporter: Exporter<A, S>, looping: bool) -> anyhow::Result<()>
where
    A: LedgerAdapter + 'static,
    S: BlockSink<A::Block> + 'static,
{
    if looping {
        let passes = exporter.run_loop().await;
        info!(passes, "Export loop finished");
        return Ok(());
    }

    match exporter.pass().await? {
        PassOutcome::UpToDate { .. } => Ok(()),
        PassOutcome::Synced { outcome, .. } if outcome.success => Ok(()),
        PassOutcome::Synced { outcome, from, to } if outcome.interrupted => {
            bail!("export of heights {from}..={to} interrupted after {} blocks", outcome.completed)
        },
        PassOutcome::Synced { outcome, from, to } => {
            bail!(
                "export of heights {from}..={to} failed after {} blocks",
                outcome.completed
            )
        },
    }
}

/// Options shared by every asset of a metrics invocation
#[derive(Debug, Clone)]
pub struct MetricRequest {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub save: bool,
    pub force: bool,
    pub metrics: Vec<String>,
    pub excluded: Vec<String>,
}

type PgEngine = MetricEngine<PgLedgerQuery, PgMetricStore>;

fn engine(pool: &PgPool, asset: Asset, floor: NaiveDate) -> anyhow::Result<PgEngine> {
    let engine = MetricEngine::new(
        asset,
        PgLedgerQuery::new(pool.clone(), asset),
        PgMetricStore::new(pool.clone(), asset),
    )?;
    Ok(engine.with_floor(floor))
}

async fn run_metrics(pool: &PgPool, asset: Asset, request: &MetricRequest) -> anyhow::Result<()> {
    let engine = engine(pool, asset, request.start)?;
    let metrics = engine.resolve(&request.metrics, &request.excluded)?;
    let result = engine
        .run_metrics(&metrics, Some(request.start), request.end, request.save, request.force)
        .await;
    match result {
        Ok(summary) => {
            if !request.save {
                print_summary(asset, &summary);
            }
            info!(%asset, computed = summary.computed(), "Metrics run finished");
            Ok(())
        },
        Err(MetricError::NoLedgerData(asset)) => {
            warn!(%asset, "No stored blocks, skipping");
            Ok(())
        },
        Err(e) => Err(e).with_context(|| format!("computing {asset} metrics")),
    }
}

fn print_summary(asset: Asset, summary: &RunSummary) {
    for result in &summary.results {
        let value = result
            .value
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "NULL".to_string());
        println!("{asset}\t{}\t{}\t{value}", result.date, result.metric);
    }
}

/// Recompute every asset from the default start date up to today, saving
/// results, until cancelled
async fn metrics_loop(
    pool: &PgPool,
    assets: &[Asset],
    excluded: &[String],
    cancel: CancellationToken,
) {
    let sleep = Duration::from_secs(crate::config::DEFAULT_LOOP_SLEEP_SECS);
    loop {
        for &asset in assets {
            let request = MetricRequest {
                start: default_start_date(),
                end: Some(Utc::now().date_naive()),
                save: true,
                force: false,
                metrics: Vec::new(),
                excluded: excluded.to_vec(),
            };
            if let Err(e) = run_metrics(pool, asset, &request).await {
                error!(%asset, error = %format!("{e:#}"), "Metrics run failed");
            }
            if cancel.is_cancelled() {
                return;
            }
        }

        info!(seconds = sleep.as_secs(), "Sleeping before next metrics run");
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Metrics loop stopped");
                return;
            },
            _ = tokio::time::sleep(sleep) => {},
        }
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2009, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from([
            "blocksql",
            "export",
            "ltc",
            "--db",
            "postgresql://localhost/blocksql",
            "--node",
            "10.0.0.1:9332:rpc:secret",
            "10.0.0.2:9332:rpc:secret",
            "--rpcthreads",
            "16",
            "--loop",
        ])
        .unwrap();

        match cli.command {
            Commands::Export {
                asset,
                nodes,
                rpcthreads,
                lag_secs,
                looping,
                exclusions,
                ..
            } => {
                assert_eq!(asset, Asset::Ltc);
                assert_eq!(nodes.len(), 2);
                assert_eq!(nodes[1].host, "10.0.0.2");
                assert_eq!(rpcthreads, 16);
                assert_eq!(lag_secs, 7200);
                assert!(looping);
                assert!(exclusions.is_none());
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_metrics_defaults() {
        let cli = Cli::try_parse_from([
            "blocksql",
            "metrics",
            "btc",
            "doge",
            "--db",
            "postgresql://localhost/blocksql",
            "--save",
            "--metrics",
            "tx_count",
            "fees",
        ])
        .unwrap();

        match cli.command {
            Commands::Metrics {
                assets,
                startdate,
                enddate,
                save,
                force,
                metrics,
                ..
            } => {
                assert_eq!(assets, vec![Asset::Btc, Asset::Doge]);
                assert_eq!(startdate, default_start_date());
                assert!(enddate.is_none());
                assert!(save);
                assert!(!force);
                assert_eq!(metrics, vec!["tx_count", "fees"]);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_schema_actions_are_exclusive() {
        let ok = Cli::try_parse_from([
            "blocksql", "schema", "zec", "--db", "postgresql://x", "--add-index",
        ])
        .unwrap();
        match ok.command {
            Commands::Schema { action, .. } => assert_eq!(action.op(), SchemaOp::AddIndexes),
            other => panic!("unexpected command {other:?}"),
        }

        let both = Cli::try_parse_from([
            "blocksql", "schema", "zec", "--db", "postgresql://x", "--create", "--drop",
        ]);
        assert!(both.is_err());

        let none = Cli::try_parse_from(["blocksql", "schema", "zec", "--db", "postgresql://x"]);
        assert!(none.is_err());
    }

    #[test]
    fn test_unknown_asset_is_rejected() {
        let result = Cli::try_parse_from([
            "blocksql", "export", "eth", "--db", "postgresql://x", "--node", "h:1:u:p",
        ]);
        assert!(result.is_err());
    }
}
