//! Per-invocation generation context.

use rustc_hash::FxHashMap;

use brg_ir::Val;

use crate::RngStream;

/// The value bag passed into every compiled delegate call: loop indices, a
/// time value, a random stream, and the hoisted-value cache backing
/// sample-once operators.
///
/// A context produced for one invocation is never mutated by a sibling or
/// child invocation; [`GenCtx::copy`] hands out an independent context with
/// its own hoist map and a derived random stream.
#[derive(Clone, Debug)]
pub struct GenCtx {
    /// Loop iteration.
    pub i: u32,
    /// Parent loop iteration.
    pub pi: u32,
    /// Firing index.
    pub index: u32,
    /// Time in seconds since the invocation started.
    pub t: f32,
    pub rng: RngStream,
    hoisted: FxHashMap<String, Val>,
}

impl GenCtx {
    pub fn new(rng: RngStream) -> Self {
        GenCtx {
            i: 0,
            pi: 0,
            index: 0,
            t: 0.0,
            rng,
            hoisted: FxHashMap::default(),
        }
    }

    /// Independent copy for a nested invocation: the hoist map is cloned
    /// (never aliased), the random stream is split on the child index, and
    /// the parent's loop index becomes the child's parent index.
    #[must_use]
    pub fn copy(&self, child_index: u32) -> GenCtx {
        GenCtx {
            i: 0,
            pi: self.i,
            index: child_index,
            t: self.t,
            rng: self.rng.split(u64::from(child_index)),
            hoisted: self.hoisted.clone(),
        }
    }

    /// Sample-once read: the stored value if `key` has been sampled in this
    /// context's lifetime.
    pub fn hoisted(&self, key: &str) -> Option<Val> {
        self.hoisted.get(key).copied()
    }

    /// Store a sampled value.
    pub fn hoist(&mut self, key: &str, value: Val) {
        self.hoisted.insert(key.to_owned(), value);
    }

    /// Stop-sampling: drop the cached value so the next read re-samples.
    pub fn clear_hoisted(&mut self, key: &str) {
        self.hoisted.remove(key);
    }
}
