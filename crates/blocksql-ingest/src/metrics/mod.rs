// Daily metrics
//
// Metrics are computed per calendar day from the canonical tables and kept
// in one narrow (date, value) table per metric and asset. The engine works
// against two seams:
// - `LedgerQuery`, read-only questions about the canonical data
// - `MetricStore`, the persisted metric values
// Both have PostgreSQL implementations in `postgres`.

pub mod engine;
pub mod postgres;
pub mod registry;
pub mod supply;

pub use engine::{MetricEngine, MetricResult, RunSummary};
pub use postgres::{PgLedgerQuery, PgMetricStore};
pub use registry::{DailyMetric, MetricDef, MetricGroup, MetricKind, REGISTRY};

use async_trait::async_trait;
use blocksql_common::Asset;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use sqlx::types::BigDecimal;
use std::collections::BTreeSet;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetricError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("No blocks stored for {0}")]
    NoLedgerData(Asset),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Metrics are not computed for {0}")]
    Unsupported(Asset),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Half-open interval covering one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DayWindow {
    pub fn of(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN);
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }
}

/// Read-only questions the metric engine asks of the canonical tables
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Earliest and latest block time, `None` when nothing is stored
    async fn block_time_bounds(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>>;

    async fn daily_value(&self, metric: DailyMetric, window: DayWindow)
        -> Result<Option<BigDecimal>>;

    /// Value of outputs created within the `days` days ending with `date`
    /// and still unspent at the end of `date`
    async fn active_supply(&self, days: u32, date: NaiveDate) -> Result<BigDecimal>;

    /// `active_supply(days, date) - active_supply(days, date - 1)`
    async fn active_supply_delta(&self, days: u32, date: NaiveDate) -> Result<BigDecimal>;
}

/// Persisted metric values
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Create the metric's table if needed
    async fn prepare(&self, metric: &str) -> Result<()>;

    async fn persisted_dates(&self, metric: &str) -> Result<BTreeSet<NaiveDate>>;

    /// `None` when no row exists for the date or its value is NULL
    async fn value_at(&self, metric: &str, date: NaiveDate) -> Result<Option<BigDecimal>>;

    async fn upsert(&self, metric: &str, date: NaiveDate, value: Option<&BigDecimal>) -> Result<()>;

    async fn drop_metric(&self, metric: &str) -> Result<()>;
}
