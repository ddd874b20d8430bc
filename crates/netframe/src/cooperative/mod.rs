//! Single-thread-driven models: many connections share one (or two) OS
//! threads via a resumable worker that yields at every would-block point
//! instead of blocking it.

mod busyloop;
mod readiness;
mod task;

pub use busyloop::BusyLoopServer;
pub use readiness::ReadinessServer;
pub use task::{IoDirection, ResumableWorker, StepOutcome};
