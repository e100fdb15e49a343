//! PostgreSQL implementations of the metric seams

use super::registry::{sql_for, DailyMetric, Sign};
use super::supply::{closed_form_sql, delta_sql, SupplyWindow};
use super::{DayWindow, LedgerQuery, MetricStore, Result};
use crate::store::Schema;
use async_trait::async_trait;
use blocksql_common::Asset;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::debug;

/// Metric queries over one asset's canonical tables
#[derive(Clone)]
pub struct PgLedgerQuery {
    pool: PgPool,
    asset: Asset,
    schema: Schema,
}

impl PgLedgerQuery {
    pub fn new(pool: PgPool, asset: Asset) -> Self {
        Self {
            pool,
            asset,
            schema: Schema::new(asset),
        }
    }

    async fn scalar(&self, sql: &str, window: DayWindow) -> Result<Option<BigDecimal>> {
        let value: Option<BigDecimal> = sqlx::query_scalar(sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_one(&self.pool)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl LedgerQuery for PgLedgerQuery {
    async fn block_time_bounds(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        let sql = format!(
            "SELECT MIN(block_time), MAX(block_time) FROM {}",
            self.schema.blocks_table()
        );
        let (min, max): (Option<NaiveDateTime>, Option<NaiveDateTime>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(min.zip(max))
    }

    async fn daily_value(
        &self,
        metric: DailyMetric,
        window: DayWindow,
    ) -> Result<Option<BigDecimal>> {
        let sql = sql_for(self.asset, metric);
        debug!(asset = %self.asset, ?metric, start = %window.start, "Computing daily value");
        let base = self.scalar(&sql.base, window).await?;
        if sql.adjustments.is_empty() {
            return Ok(base);
        }

        let mut value = base.unwrap_or_default();
        for (sign, statement) in &sql.adjustments {
            let adjustment = self.scalar(statement, window).await?.unwrap_or_default();
            value = match sign {
                Sign::Plus => value + adjustment,
                Sign::Minus => value - adjustment,
            };
        }
        Ok(Some(value))
    }

    async fn active_supply(&self, days: u32, date: NaiveDate) -> Result<BigDecimal> {
        let window = SupplyWindow::new(days, date);
        let value: Option<BigDecimal> =
            sqlx::query_scalar(&closed_form_sql(&self.schema.outputs_table()))
                .bind(window.window_start)
                .bind(window.day.end)
                .fetch_one(&self.pool)
                .await?;
        Ok(value.unwrap_or_default())
    }

    async fn active_supply_delta(&self, days: u32, date: NaiveDate) -> Result<BigDecimal> {
        let window = SupplyWindow::new(days, date);
        let value: Option<BigDecimal> =
            sqlx::query_scalar(&delta_sql(&self.schema.outputs_table()))
                .bind(window.day.start)
                .bind(window.day.end)
                .bind(window.aged_start)
                .bind(window.window_start)
                .fetch_one(&self.pool)
                .await?;
        Ok(value.unwrap_or_default())
    }
}

/// `statistic_{metric}_{asset}` tables
#[derive(Clone)]
pub struct PgMetricStore {
    pool: PgPool,
    asset: Asset,
}

impl PgMetricStore {
    pub fn new(pool: PgPool, asset: Asset) -> Self {
        Self { pool, asset }
    }

    pub fn table_name(&self, metric: &str) -> String {
        format!("statistic_{metric}_{}", self.asset)
    }
}

#[async_trait]
impl MetricStore for PgMetricStore {
    async fn prepare(&self, metric: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (date TIMESTAMP PRIMARY KEY, value NUMERIC)",
            self.table_name(metric)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn persisted_dates(&self, metric: &str) -> Result<BTreeSet<NaiveDate>> {
        let sql = format!("SELECT date FROM {}", self.table_name(metric));
        let dates: Vec<NaiveDateTime> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(dates.into_iter().map(|d| d.date()).collect())
    }

    async fn value_at(&self, metric: &str, date: NaiveDate) -> Result<Option<BigDecimal>> {
        let sql = format!("SELECT value FROM {} WHERE date = $1", self.table_name(metric));
        let value: Option<Option<BigDecimal>> = sqlx::query_scalar(&sql)
            .bind(DayWindow::of(date).start)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.flatten())
    }

    async fn upsert(&self, metric: &str, date: NaiveDate, value: Option<&BigDecimal>) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (date, value) VALUES ($1, $2) \
             ON CONFLICT (date) DO UPDATE SET value = EXCLUDED.value",
            self.table_name(metric)
        );
        sqlx::query(&sql)
            .bind(DayWindow::of(date).start)
            .bind(value.cloned())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_metric(&self, metric: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table_name(metric));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
