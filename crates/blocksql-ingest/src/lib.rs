//! blocksql ingestion library
//!
//! Copies UTXO ledgers from their full nodes into PostgreSQL and derives
//! daily statistics from the stored tables.
//!
//! # Overview
//!
//! - **Pipeline**: worker-pool stages, ordered reassembly and a credit
//!   window bounding work in flight (`pipeline`)
//! - **Adapters**: JSON-RPC access and normalization of every supported
//!   ledger variant into one canonical block model (`rpc`, `adapter`, `model`)
//! - **Store**: asset-parameterized tables written one block per transaction
//!   (`store`)
//! - **Export**: node selection and pass orchestration (`nodes`, `export`)
//! - **Metrics**: incremental daily metrics with a windowed supply recurrence
//!   (`metrics`)
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod adapter;
pub mod amount;
pub mod cli;
pub mod config;
pub mod export;
pub mod metrics;
pub mod model;
pub mod nodes;
pub mod pipeline;
pub mod rpc;
pub mod store;

pub use cli::{Cli, Commands};
pub use export::{ExportError, Exporter, PassOutcome};
