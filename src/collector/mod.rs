//! The stats-collection pipeline: retry, per-student fan-out, batched cycles,
//! and the periodic trigger.

pub mod batch;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;

pub use batch::{BatchSettings, CycleReport, CycleTrigger, run_cycle};
pub use orchestrator::{Collector, PlatformResult, StudentReport};
pub use retry::{RetryExhausted, RetryPolicy};
pub use scheduler::{CycleRunner, StatsScheduler};
