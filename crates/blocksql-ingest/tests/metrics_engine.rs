//! Daily metric engine against in-memory ledger and metric store fakes

mod common;

use blocksql_common::Asset;
use blocksql_ingest::metrics::supply::{closed_form, SupplyOutput};
use blocksql_ingest::metrics::{MetricEngine, MetricError};
use chrono::TimeDelta;
use common::{at, day, dec, init_tracing, FakeTx, MemoryLedger, MemoryStore};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn engine(ledger: &MemoryLedger, store: &MemoryStore) -> MetricEngine<MemoryLedger, MemoryStore> {
    MetricEngine::new(Asset::Btc, ledger.clone(), store.clone()).unwrap()
}

/// Outputs spread over forty days, a third of them spent later on
fn busy_ledger() -> (MemoryLedger, Vec<SupplyOutput>) {
    let ledger = MemoryLedger::default();
    let mut outputs = Vec::new();
    for i in 0..120i64 {
        let created = at(i % 40, i % 24);
        let spent = (i % 3 == 0).then(|| created + TimeDelta::hours(7 + (i * 13) % 500));
        let output = SupplyOutput {
            created,
            spent,
            value: 1_000 + i as u128,
        };
        outputs.push(output);
        ledger.push(FakeTx {
            time: created,
            coinbase: false,
            fee: 0,
            outputs: vec![output],
        });
    }
    // closes day 39
    ledger.coinbase(at(40, 1), 1);
    (ledger, outputs)
}

#[tokio::test]
async fn test_single_coinbase_reward_and_fees() {
    init_tracing();
    let ledger = MemoryLedger::default();
    ledger.coinbase(at(0, 12), 50_00000000);
    ledger.coinbase(at(1, 0), 50_00000000);
    let store = MemoryStore::default();

    let summary = engine(&ledger, &store)
        .run(&names(&["reward", "fees"]), &[], None, None, true, false)
        .await
        .unwrap();

    assert_eq!(summary.candidate_dates, 1);
    assert_eq!(summary.computed(), 2);
    let reward = summary.value("reward", day(0)).unwrap();
    assert_eq!(reward.value, Some(dec(5_000_000_000)));
    let fees = summary.value("fees", day(0)).unwrap();
    assert_eq!(fees.value, Some(dec(0)));
    assert_eq!(store.value("reward", day(0)), Some(Some(dec(5_000_000_000))));
    // day 1 is not complete yet
    assert_eq!(store.value("reward", day(1)), None);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (ledger, _) = busy_ledger();
    let store = MemoryStore::default();
    let engine = engine(&ledger, &store);

    let first = engine.run(&[], &[], None, None, true, false).await.unwrap();
    assert_eq!(first.candidate_dates, 40);
    assert_eq!(first.computed(), 40 * 12);
    let upserts = store.upserts();

    let second = engine.run(&[], &[], None, None, true, false).await.unwrap();
    assert_eq!(second.computed(), 0);
    assert_eq!(store.upserts(), upserts);

    let forced = engine.run(&names(&["tx_count"]), &[], None, None, true, true).await.unwrap();
    assert_eq!(forced.computed(), 40);
    assert_eq!(store.rows("tx_count"), 40);
    for result in &forced.results {
        assert_eq!(
            store.value("tx_count", result.date).flatten(),
            first.value("tx_count", result.date).unwrap().value
        );
    }
}

#[tokio::test]
async fn test_excluded_metrics_are_skipped() {
    let (ledger, _) = busy_ledger();
    let store = MemoryStore::default();

    let summary = engine(&ledger, &store)
        .run(&[], &names(&["tx_count", "fees"]), None, None, true, false)
        .await
        .unwrap();

    assert_eq!(summary.computed(), 40 * 10);
    assert!(summary.value("tx_count", day(0)).is_none());
    assert_eq!(store.rows("tx_count"), 0);
    assert_eq!(store.rows("fees"), 0);
    assert_eq!(store.rows("reward"), 40);
}

#[tokio::test]
async fn test_active_supply_recurrence_matches_closed_form() {
    let (ledger, outputs) = busy_ledger();
    let store = MemoryStore::default();

    let summary = engine(&ledger, &store)
        .run(&names(&["active_supply_30d"]), &[], None, None, true, false)
        .await
        .unwrap();

    assert_eq!(summary.computed(), 40);
    for n in 0..40 {
        let expected = closed_form(&outputs, 30, day(n));
        assert_eq!(
            summary.value("active_supply_30d", day(n)).unwrap().value,
            Some(dec(expected)),
            "day {n}"
        );
    }
    // seeded once, then one delta per following day
    assert_eq!(ledger.closed_form_calls(), 1);
    assert_eq!(ledger.delta_calls(), 39);
}

#[tokio::test]
async fn test_resumed_run_seeds_from_stored_value() {
    let (ledger, outputs) = busy_ledger();
    let store = MemoryStore::default();
    let engine = engine(&ledger, &store);
    let metric = names(&["active_supply_30d"]);

    let first = engine.run(&metric, &[], None, Some(day(9)), true, false).await.unwrap();
    assert_eq!(first.computed(), 10);

    let second = engine.run(&metric, &[], None, None, true, false).await.unwrap();
    assert_eq!(second.computed(), 30);
    assert_eq!(ledger.closed_form_calls(), 1);
    assert_eq!(
        store.value("active_supply_30d", day(39)).flatten(),
        Some(dec(closed_form(&outputs, 30, day(39))))
    );
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let (ledger, outputs) = busy_ledger();
    let store = MemoryStore::default();

    let summary = engine(&ledger, &store)
        .run(&names(&["active_supply_365d", "reward"]), &[], None, None, false, false)
        .await
        .unwrap();

    assert!(!summary.persisted);
    assert_eq!(summary.computed(), 80);
    assert_eq!(store.upserts(), 0);
    assert_eq!(
        summary.value("active_supply_365d", day(20)).unwrap().value,
        Some(dec(closed_form(&outputs, 365, day(20))))
    );
}

#[tokio::test]
async fn test_requested_range_is_clamped() {
    let (ledger, _) = busy_ledger();
    let store = MemoryStore::default();

    let summary = engine(&ledger, &store)
        .run(&names(&["fees"]), &[], Some(day(3)), Some(day(5)), true, false)
        .await
        .unwrap();
    assert_eq!(summary.candidate_dates, 3);
    let dates: Vec<_> = summary.results.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![day(3), day(4), day(5)]);

    let floored = MetricEngine::new(Asset::Btc, ledger.clone(), store.clone())
        .unwrap()
        .with_floor(day(38))
        .run(&names(&["fees"]), &[], None, Some(day(100)), false, true)
        .await
        .unwrap();
    assert_eq!(floored.candidate_dates, 2);
}

#[tokio::test]
async fn test_empty_ledger_is_no_data() {
    let err = engine(&MemoryLedger::default(), &MemoryStore::default())
        .run(&[], &[], None, None, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricError::NoLedgerData(Asset::Btc)));
}

#[tokio::test]
async fn test_unknown_metric_is_rejected() {
    let (ledger, _) = busy_ledger();
    let store = MemoryStore::default();
    let err = engine(&ledger, &store)
        .run(&names(&["tx_count", "hashrate"]), &[], None, None, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricError::UnknownMetric(name) if name == "hashrate"));
    assert_eq!(store.upserts(), 0);
}

#[test]
fn test_omni_has_no_metrics() {
    let result = MetricEngine::new(Asset::Omni, MemoryLedger::default(), MemoryStore::default());
    assert!(matches!(result, Err(MetricError::Unsupported(Asset::Omni))));
}

#[test]
fn test_resolve_groups_and_exclusions() {
    let engine = engine(&MemoryLedger::default(), &MemoryStore::default());

    let defaults = engine.resolve(&[], &[]).unwrap();
    assert_eq!(defaults.len(), 12);
    assert!(defaults.iter().all(|d| d.name != "heuristical_volume"));

    let trimmed = engine.resolve(&[], &names(&["tx_count", "median_fee"])).unwrap();
    assert_eq!(trimmed.len(), 10);

    let heuristic = engine.resolve(&names(&["heuristical_volume"]), &[]).unwrap();
    assert_eq!(heuristic.len(), 1);
    assert_eq!(engine.list().len(), 13);
}

#[tokio::test]
async fn test_drop_removes_tables() {
    let (ledger, _) = busy_ledger();
    let store = MemoryStore::default();
    let engine = engine(&ledger, &store);

    engine.run(&names(&["fees", "reward"]), &[], None, None, true, false).await.unwrap();
    assert_eq!(store.rows("fees"), 40);

    engine.drop_metrics(&names(&["fees"])).await.unwrap();
    assert_eq!(store.rows("fees"), 0);
    assert_eq!(store.rows("reward"), 40);
}
