//! Shared fixtures for the integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use blocksql_ingest::metrics::supply::{self, SupplyOutput};
use blocksql_ingest::metrics::{DailyMetric, LedgerQuery, MetricStore};
use blocksql_ingest::metrics::{DayWindow, Result};
use blocksql_ingest::model::{CanonicalBlock, CanonicalTransaction, Hash256, Input, Output, OutputType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use sqlx::types::BigDecimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,blocksql_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 3, 1).unwrap() + TimeDelta::days(n)
}

pub fn at(n: i64, hour: i64) -> NaiveDateTime {
    DayWindow::of(day(n)).start + TimeDelta::hours(hour)
}

pub fn dec(value: i128) -> BigDecimal {
    value.to_string().parse().unwrap()
}

/// Deterministic distinct hash for test fixtures
pub fn hash(seed: u64) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    bytes[0] = 0x0f;
    Hash256::from_bytes(bytes)
}

/// A transaction of the in-memory ledger
#[derive(Debug, Clone)]
pub struct FakeTx {
    pub time: NaiveDateTime,
    pub coinbase: bool,
    pub fee: u128,
    pub outputs: Vec<SupplyOutput>,
}

/// Ledger answering daily questions from an in-memory transaction list.
///
/// Only the metrics the engine tests need are modelled: tx_count, fees,
/// reward and the windowed supply. Everything else reads as NULL.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    pub transactions: Arc<Mutex<Vec<FakeTx>>>,
    pub closed_form_calls: Arc<AtomicUsize>,
    pub delta_calls: Arc<AtomicUsize>,
}

impl MemoryLedger {
    pub fn push(&self, tx: FakeTx) {
        self.transactions.lock().unwrap().push(tx);
    }

    pub fn coinbase(&self, time: NaiveDateTime, value: u128) {
        self.push(FakeTx {
            time,
            coinbase: true,
            fee: 0,
            outputs: vec![SupplyOutput {
                created: time,
                spent: None,
                value,
            }],
        });
    }

    fn outputs(&self) -> Vec<SupplyOutput> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .flat_map(|tx| tx.outputs.clone())
            .collect()
    }

    pub fn closed_form_calls(&self) -> usize {
        self.closed_form_calls.load(Ordering::SeqCst)
    }

    pub fn delta_calls(&self) -> usize {
        self.delta_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerQuery for MemoryLedger {
    async fn block_time_bounds(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        let txs = self.transactions.lock().unwrap();
        let min = txs.iter().map(|tx| tx.time).min();
        let max = txs.iter().map(|tx| tx.time).max();
        Ok(min.zip(max))
    }

    async fn daily_value(
        &self,
        metric: DailyMetric,
        window: DayWindow,
    ) -> Result<Option<BigDecimal>> {
        let txs = self.transactions.lock().unwrap();
        let today: Vec<&FakeTx> = txs
            .iter()
            .filter(|tx| tx.time >= window.start && tx.time < window.end)
            .collect();
        let value = match metric {
            DailyMetric::TxCount => Some(today.iter().filter(|tx| !tx.coinbase).count() as i128),
            DailyMetric::Fees => Some(today.iter().map(|tx| tx.fee as i128).sum()),
            DailyMetric::Reward => Some(
                today
                    .iter()
                    .filter(|tx| tx.coinbase)
                    .flat_map(|tx| tx.outputs.iter())
                    .map(|o| o.value as i128)
                    .sum(),
            ),
            _ => None,
        };
        Ok(value.map(dec))
    }

    async fn active_supply(&self, days: u32, date: NaiveDate) -> Result<BigDecimal> {
        self.closed_form_calls.fetch_add(1, Ordering::SeqCst);
        Ok(dec(supply::closed_form(&self.outputs(), days, date)))
    }

    async fn active_supply_delta(&self, days: u32, date: NaiveDate) -> Result<BigDecimal> {
        self.delta_calls.fetch_add(1, Ordering::SeqCst);
        Ok(dec(supply::delta(&self.outputs(), days, date)))
    }
}

type Tables = BTreeMap<String, BTreeMap<NaiveDate, Option<BigDecimal>>>;

/// Metric tables kept in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub tables: Arc<Mutex<Tables>>,
    pub upserts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn value(&self, metric: &str, date: NaiveDate) -> Option<Option<BigDecimal>> {
        self.tables
            .lock()
            .unwrap()
            .get(metric)
            .and_then(|table| table.get(&date).cloned())
    }

    pub fn rows(&self, metric: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(metric)
            .map_or(0, BTreeMap::len)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn prepare(&self, metric: &str) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .entry(metric.to_string())
            .or_default();
        Ok(())
    }

    async fn persisted_dates(&self, metric: &str) -> Result<BTreeSet<NaiveDate>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(metric)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn value_at(&self, metric: &str, date: NaiveDate) -> Result<Option<BigDecimal>> {
        Ok(self.value(metric, date).flatten())
    }

    async fn upsert(&self, metric: &str, date: NaiveDate, value: Option<&BigDecimal>) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .entry(metric.to_string())
            .or_default()
            .insert(date, value.cloned());
        Ok(())
    }

    async fn drop_metric(&self, metric: &str) -> Result<()> {
        self.tables.lock().unwrap().remove(metric);
        Ok(())
    }
}

pub fn utc(time: NaiveDateTime) -> DateTime<Utc> {
    time.and_utc()
}

/// Block holding one coinbase transaction paying `value` to one key
pub fn coinbase_block(height: u64, time: NaiveDateTime, value: u128) -> CanonicalBlock {
    let mut coinbase = CanonicalTransaction::new(hash(1000 + height), 134, utc(time), true);
    coinbase.coinbase_script = Some(vec![0x04, 0xff, 0xff, 0x00, 0x1d]);
    coinbase.outputs.push(Output {
        index: 0,
        output_type: OutputType::PubKey,
        addresses: vec![format!("1Miner{height}")],
        script: vec![0x41, 0x04, 0xac],
        value,
    });
    CanonicalBlock {
        height,
        hash: hash(height),
        chain_work: hash(0),
        time: utc(time),
        median_time: Some(utc(time)),
        size: 215,
        difficulty: 1.0,
        transactions: vec![coinbase],
    }
}

/// Transaction spending `spent` outputs into one output of `value`
pub fn payment(seed: u64, time: NaiveDateTime, spent: &[(Hash256, u32)], value: u128) -> CanonicalTransaction {
    let mut tx = CanonicalTransaction::new(hash(seed), 226, utc(time), false);
    tx.inputs = spent
        .iter()
        .map(|(tx_hash, output_index)| Input {
            tx_hash: *tx_hash,
            output_index: *output_index,
        })
        .collect();
    tx.outputs.push(Output {
        index: 0,
        output_type: OutputType::PubKeyHash,
        addresses: vec![format!("1Payee{seed}")],
        script: vec![0x76, 0xa9, 0x14],
        value,
    });
    tx
}
