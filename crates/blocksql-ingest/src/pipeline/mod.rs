// Ingestion pipeline engine
//
// A fetch stage with many workers overlaps slow RPC calls; its out-of-order
// completions pass through a reassembler into a single-worker store stage.
// The supplier admits new heights only within a credit window, and the
// runner stops everything on completion, fault or operator interruption.

pub mod eta;
pub mod reassembler;
pub mod runner;
pub mod stage;
pub mod supplier;

pub use eta::{format_eta, ProgressEstimator};
pub use reassembler::{connect, OrderingReassembler, ReassemblyStats};
pub use runner::{PipelineRunner, RunOutcome, StageFailures, DEFAULT_CREDIT_WINDOW};
pub use stage::{
    Completion, FailureLog, PipelineStage, StageControl, StageHandle, StopPredicate, Submit,
    TaskFailure,
};
pub use supplier::{BackpressureSupplier, CompletionCounter, CONTROL_TICK};
