//! Frame-stepped execution: a priority-laned coroutine scheduler and a
//! keyed recycling pool for transient entities.

mod pool;
mod scheduler;

pub use pool::{EntityId, Pool, PoolItem};
pub use scheduler::{Coroutine, SchedOps, Scheduler, Step, Tier};
