//! Named worker pool executing one pipeline step

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument};

type Processor<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

/// Shared predicate consulted by workers before each task
pub type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Successful result of one task, tagged with its submission index
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<R> {
    pub index: usize,
    pub result: R,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub detail: String,
}

/// Failures captured by one stage
#[derive(Debug, Default)]
pub struct FailureLog {
    faulted: AtomicBool,
    entries: Mutex<Vec<TaskFailure>>,
}

impl FailureLog {
    pub fn record(&self, index: usize, detail: String) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TaskFailure { index, detail });
        self.faulted.store(true, Ordering::SeqCst);
    }

    pub fn faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<TaskFailure> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        entries.sort_by_key(|f| f.index);
        entries
    }
}

/// Late-bound stop predicate. Never raised until one is installed.
#[derive(Clone, Default)]
pub struct StopSignal {
    predicate: Arc<Mutex<Option<StopPredicate>>>,
}

impl StopSignal {
    pub fn install(&self, predicate: StopPredicate) {
        *self.predicate.lock().unwrap_or_else(PoisonError::into_inner) = Some(predicate);
    }

    pub fn raised(&self) -> bool {
        let predicate = self
            .predicate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        predicate.is_some_and(|p| p())
    }
}

/// Anything that accepts indexed tasks
pub trait Submit<T>: Send + Sync {
    /// Non-blocking enqueue. Returns `false` when the stage no longer accepts input.
    fn submit(&self, task: T, index: usize) -> bool;
}

/// Type-erased view of a stage used by the runner
#[async_trait]
pub trait StageControl: Send + Sync {
    fn name(&self) -> &str;
    fn faulted(&self) -> bool;
    fn failures(&self) -> Vec<TaskFailure>;
    fn failure_log(&self) -> Arc<FailureLog>;
    fn install_stop(&self, predicate: StopPredicate);
    /// Close the input queue and wait for every worker to exit
    async fn drain(&self);
}

/// Cloneable submission handle to a stage's input queue
pub struct StageHandle<T> {
    sender: UnboundedSender<(usize, T)>,
}

impl<T> Clone for StageHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send> Submit<T> for StageHandle<T> {
    fn submit(&self, task: T, index: usize) -> bool {
        self.sender.send((index, task)).is_ok()
    }
}

/// A bounded worker pool executing one step (fetch or store).
///
/// Workers pull from one FIFO queue, so a single-worker stage processes
/// tasks in submission order. A failed task is recorded and never aborts the
/// stage. When the stop signal is raised queued tasks are dropped silently.
pub struct PipelineStage<T, R> {
    name: String,
    input: Mutex<Option<UnboundedSender<(usize, T)>>>,
    completions: Mutex<Option<UnboundedReceiver<Completion<R>>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    failures: Arc<FailureLog>,
    stop: StopSignal,
}

impl<T, R> PipelineStage<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `workers` tasks on the current runtime
    pub fn new<F, Fut>(name: impl Into<String>, workers: usize, processor: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = name.into();
        let processor: Processor<T, R> = Arc::new(move |task| processor(task).boxed());
        let (input_tx, input_rx) = mpsc::unbounded_channel::<(usize, T)>();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let input_rx = Arc::new(tokio::sync::Mutex::new(input_rx));
        let failures = Arc::new(FailureLog::default());
        let stop = StopSignal::default();

        let handles = (0..workers.max(1))
            .map(|worker| {
                let span = tracing::debug_span!("stage_worker", stage = %name, worker);
                tokio::spawn(
                    worker_loop(
                        input_rx.clone(),
                        processor.clone(),
                        done_tx.clone(),
                        failures.clone(),
                        stop.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        Self {
            name,
            input: Mutex::new(Some(input_tx)),
            completions: Mutex::new(Some(done_rx)),
            workers: tokio::sync::Mutex::new(handles),
            failures,
            stop,
        }
    }

    /// Take the completion channel. There is exactly one consumer.
    pub fn take_completions(&self) -> Option<UnboundedReceiver<Completion<R>>> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Submission handle that keeps the input open until dropped
    pub fn handle(&self) -> Option<StageHandle<T>> {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| StageHandle {
                sender: sender.clone(),
            })
    }
}

impl<T: Send + 'static, R: Send + 'static> Submit<T> for PipelineStage<T, R> {
    fn submit(&self, task: T, index: usize) -> bool {
        match self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(sender) => sender.send((index, task)).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static, R: Send + 'static> StageControl for PipelineStage<T, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn faulted(&self) -> bool {
        self.failures.faulted()
    }

    fn failures(&self) -> Vec<TaskFailure> {
        self.failures.snapshot()
    }

    fn failure_log(&self) -> Arc<FailureLog> {
        self.failures.clone()
    }

    fn install_stop(&self, predicate: StopPredicate) {
        self.stop.install(predicate);
    }

    async fn drain(&self) {
        drop(
            self.input
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(stage = %self.name, error = %e, "Worker task ended abnormally");
            }
        }
        debug!(stage = %self.name, "Stage drained");
    }
}

async fn worker_loop<T, R>(
    input: Arc<tokio::sync::Mutex<UnboundedReceiver<(usize, T)>>>,
    processor: Processor<T, R>,
    completions: UnboundedSender<Completion<R>>,
    failures: Arc<FailureLog>,
    stop: StopSignal,
) where
    T: Send + 'static,
    R: Send + 'static,
{
    loop {
        let next = input.lock().await.recv().await;
        let Some((index, task)) = next else {
            break;
        };

        if stop.raised() {
            trace!(index, "Stop signal raised, dropping task");
            continue;
        }

        match AssertUnwindSafe(processor(task)).catch_unwind().await {
            Ok(Ok(result)) => {
                // A dropped receiver only means nobody listens for completions
                let _ = completions.send(Completion { index, result });
            },
            Ok(Err(err)) => {
                warn!(index, error = %format!("{err:#}"), "Task failed");
                failures.record(index, format!("{err:?}"));
            },
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                warn!(index, %detail, "Task panicked");
                failures.record(index, detail);
            },
        }
    }
}
