//! # prdigest-scheduler
//!
//! The scheduled-run engine: a recurrence calculator, the four-stage
//! run executor, the single-worker tick loop that drives it, the hooks
//! the API layer reaches it through, and the reaper that cleans up
//! after crashes.
//!
//! ## Architecture
//! ```text
//! TickLoop (tokio interval, one worker)
//!   ├── every tick: list_due_monitoring_entries
//!   │     └── RunExecutor: fetch → summarise → deliver → record
//!   │           └── advance_schedule (always, even on failure)
//!   ├── manual triggers (PipelineHooks::trigger_now) interleave here
//!   └── shutdown: finish the current run, stop polling
//!
//! Reaper (startup + hourly)
//!   └── started runs older than the grace window → failed/abandoned,
//!       entry re-advanced
//! ```

pub mod engine;
pub mod executor;
pub mod hooks;
pub mod reaper;
pub mod recurrence;

pub use engine::{ManualRun, TickLoop};
pub use executor::{ExecutorConfig, RunExecutor};
pub use hooks::PipelineHooks;
pub use reaper::reap_abandoned;
pub use recurrence::next_firing;
