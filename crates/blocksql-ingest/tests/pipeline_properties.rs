//! Ordering and backpressure properties of a fetch → store pipeline

use blocksql_ingest::pipeline::{connect, PipelineRunner, PipelineStage, StageControl};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Observed {
    stored: Vec<usize>,
    window_violated: bool,
    success: bool,
}

/// Fetch with per-task delays, store with one worker, and record what the
/// store saw plus whether any fetch started outside the credit window
async fn run_pipeline(delays: Vec<u64>, workers: usize, window: usize) -> Observed {
    let stored = Arc::new(Mutex::new(Vec::new()));
    let stored_count = Arc::new(AtomicUsize::new(0));
    let violated = Arc::new(AtomicBool::new(false));
    let delays = Arc::new(delays);

    let fetch = Arc::new(PipelineStage::new("fetch", workers, {
        let stored_count = stored_count.clone();
        let violated = violated.clone();
        let delays = delays.clone();
        move |task: usize| {
            if task >= stored_count.load(Ordering::SeqCst) + window {
                violated.store(true, Ordering::SeqCst);
            }
            let delay = delays[task];
            async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, anyhow::Error>(task)
            }
        }
    }));
    let store = Arc::new(PipelineStage::new("store", 1, {
        let stored = stored.clone();
        let stored_count = stored_count.clone();
        move |task: usize| {
            let stored = stored.clone();
            let stored_count = stored_count.clone();
            async move {
                stored.lock().unwrap().push(task);
                stored_count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(task)
            }
        }
    }));

    let connector = connect(fetch.take_completions().unwrap(), store.handle().unwrap());
    let tail = store.take_completions().unwrap();
    let stages: Vec<Arc<dyn StageControl>> = vec![fetch.clone() as Arc<dyn StageControl>, store.clone()];

    let outcome = PipelineRunner::new((0..delays.len()).collect())
        .credit_window(window)
        .run(fetch.as_ref(), &stages, tail)
        .await;
    connector.await.unwrap();

    let stored = stored.lock().unwrap().clone();
    Observed {
        stored,
        window_violated: violated.load(Ordering::SeqCst),
        success: outcome.success,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_store_sees_submission_order(
        delays in proptest::collection::vec(0u64..6, 1..40),
        workers in 1usize..8,
        window in 1usize..12,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let count = delays.len();
        let observed = runtime.block_on(run_pipeline(delays, workers, window));

        prop_assert!(observed.success);
        prop_assert_eq!(observed.stored, (0..count).collect::<Vec<_>>());
        prop_assert!(!observed.window_violated);
    }
}

#[tokio::test]
async fn test_slow_head_of_line_holds_back_admission() {
    // task 0 is slow: nothing beyond the window may start before it is stored
    let mut delays = vec![1; 30];
    delays[0] = 120;
    let observed = run_pipeline(delays, 8, 4).await;

    assert!(observed.success);
    assert!(!observed.window_violated);
    assert_eq!(observed.stored, (0..30).collect::<Vec<_>>());
}
