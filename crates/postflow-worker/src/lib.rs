//! Postflow Worker
//!
//! Polls the post store for due posts, claims each one, resolves its media and
//! hands it to the platform publisher, then records the outcome.

pub mod context;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
pub mod test_support;

pub use context::SchedulerContext;
pub use scheduler::{Scheduler, TickReport};
pub use worker::{SchedulerHandle, SchedulerWorker};
