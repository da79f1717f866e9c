//! Request scheduling: priority queues, dispatch, retry, and failover.

pub mod core;
pub mod queue;
pub mod request;

pub use core::{Scheduler, SubmitOutcome};
pub use queue::{ProviderQueue, QueueStatus};
pub use request::{PriorityTier, Request, SubmitRequest};
