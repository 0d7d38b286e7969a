//! Runtime primitives: per-invocation generation contexts with sample-once
//! hoisting, reproducible per-entity random streams, and the hierarchical
//! cancellation tree.

mod cancel;
mod genctx;
mod rng;

pub use cancel::{joint, null_cancel, passthrough, CancelLevel, CancelRef, CancelSource, Cancellee};
pub use genctx::GenCtx;
pub use rng::RngStream;
