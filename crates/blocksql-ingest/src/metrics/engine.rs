//! Incremental daily metric computation

use super::registry::{self, MetricDef, MetricGroup, MetricKind};
use super::{DayWindow, LedgerQuery, MetricError, MetricStore, Result};
use blocksql_common::Asset;
use chrono::{NaiveDate, TimeDelta};
use sqlx::types::BigDecimal;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
    pub date: NaiveDate,
    pub metric: &'static str,
    pub value: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Dates inside both the ledger bounds and the requested range
    pub candidate_dates: usize,
    pub results: Vec<MetricResult>,
    pub persisted: bool,
}

impl RunSummary {
    pub fn computed(&self) -> usize {
        self.results.len()
    }

    pub fn value(&self, metric: &str, date: NaiveDate) -> Option<&MetricResult> {
        self.results
            .iter()
            .find(|r| r.metric == metric && r.date == date)
    }
}

/// Runs the registry's metrics for one asset
pub struct MetricEngine<L, S> {
    asset: Asset,
    ledger: L,
    store: S,
    floor: Option<NaiveDate>,
}

impl<L: LedgerQuery, S: MetricStore> MetricEngine<L, S> {
    pub fn new(asset: Asset, ledger: L, store: S) -> Result<Self> {
        if !asset.is_utxo() {
            return Err(MetricError::Unsupported(asset));
        }
        Ok(Self {
            asset,
            ledger,
            store,
            floor: None,
        })
    }

    /// Ignore ledger days before `floor`
    pub fn with_floor(mut self, floor: NaiveDate) -> Self {
        self.floor = Some(floor);
        self
    }

    /// Every registered metric name
    pub fn list(&self) -> Vec<&'static str> {
        registry::REGISTRY.iter().map(|def| def.name).collect()
    }

    /// Resolve requested names, defaulting to the default group
    pub fn resolve(&self, names: &[String], excluded: &[String]) -> Result<Vec<&'static MetricDef>> {
        for name in names.iter().chain(excluded) {
            if registry::lookup(name).is_none() {
                return Err(MetricError::UnknownMetric(name.clone()));
            }
        }
        let selected: Vec<&'static MetricDef> = if names.is_empty() {
            registry::group(MetricGroup::Default).collect()
        } else {
            registry::REGISTRY
                .iter()
                .filter(|def| names.iter().any(|n| n == def.name))
                .collect()
        };
        Ok(selected
            .into_iter()
            .filter(|def| !excluded.iter().any(|n| n == def.name))
            .collect())
    }

    /// Candidate dates: ledger days up to the last complete one, clamped to
    /// the floor and the requested range
    async fn candidate_dates(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>> {
        let (min, max) = self
            .ledger
            .block_time_bounds()
            .await?
            .ok_or(MetricError::NoLedgerData(self.asset))?;

        let mut first = min.date();
        if let Some(floor) = self.floor {
            first = first.max(floor);
        }
        if let Some(start) = start {
            first = first.max(start);
        }
        let mut last = max.date() - TimeDelta::days(1);
        if let Some(end) = end {
            last = last.min(end);
        }

        Ok(first.iter_days().take_while(|d| *d <= last).collect())
    }

    #[instrument(skip(self, names, excluded), fields(asset = %self.asset))]
    pub async fn run(
        &self,
        names: &[String],
        excluded: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        persist: bool,
        force: bool,
    ) -> Result<RunSummary> {
        let metrics = self.resolve(names, excluded)?;
        self.run_metrics(&metrics, start, end, persist, force).await
    }

    pub async fn run_metrics(
        &self,
        metrics: &[&'static MetricDef],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        persist: bool,
        force: bool,
    ) -> Result<RunSummary> {
        let candidates = self.candidate_dates(start, end).await?;
        let mut summary = RunSummary {
            candidate_dates: candidates.len(),
            results: Vec::new(),
            persisted: persist,
        };
        if candidates.is_empty() {
            info!(asset = %self.asset, "No complete days in range");
            return Ok(summary);
        }

        // date -> registry positions missing on that date
        let mut pending: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (position, def) in metrics.iter().enumerate() {
            self.store.prepare(def.name).await?;
            let done = if force {
                Default::default()
            } else {
                self.store.persisted_dates(def.name).await?
            };
            for date in candidates.iter().filter(|d| !done.contains(d)) {
                pending.entry(*date).or_default().push(position);
            }
        }

        let mut computed: HashMap<(&'static str, NaiveDate), BigDecimal> = HashMap::new();
        for (date, positions) in pending {
            for position in positions {
                let def = metrics[position];
                let started = Instant::now();
                let value = self.compute(def, date, &computed).await?;
                if persist {
                    self.store.upsert(def.name, date, value.as_ref()).await?;
                }
                info!(
                    asset = %self.asset,
                    metric = def.name,
                    %date,
                    value = ?value.as_ref().map(ToString::to_string),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Computed metric"
                );
                if let Some(value) = &value {
                    computed.insert((def.name, date), value.clone());
                }
                summary.results.push(MetricResult {
                    date,
                    metric: def.name,
                    value,
                });
            }
        }
        Ok(summary)
    }

    async fn compute(
        &self,
        def: &MetricDef,
        date: NaiveDate,
        computed: &HashMap<(&'static str, NaiveDate), BigDecimal>,
    ) -> Result<Option<BigDecimal>> {
        match def.kind {
            MetricKind::Daily(metric) => self.ledger.daily_value(metric, DayWindow::of(date)).await,
            MetricKind::ActiveSupply { days } => {
                let previous_date = date - TimeDelta::days(1);
                let previous = match computed.get(&(def.name, previous_date)) {
                    Some(value) => Some(value.clone()),
                    None => self.store.value_at(def.name, previous_date).await?,
                };
                let value = match previous {
                    Some(previous) => {
                        previous + self.ledger.active_supply_delta(days, date).await?
                    },
                    None => self.ledger.active_supply(days, date).await?,
                };
                Ok(Some(value))
            },
        }
    }

    /// Remove every persisted value of the named metrics
    pub async fn drop_metrics(&self, names: &[String]) -> Result<()> {
        for def in self.resolve(names, &[])? {
            info!(asset = %self.asset, metric = def.name, "Dropping metric");
            self.store.drop_metric(def.name).await?;
        }
        Ok(())
    }
}
